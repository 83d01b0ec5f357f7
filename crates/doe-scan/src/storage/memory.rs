//! In-memory sink keyed by scan id.

use super::Storage;
use crate::error::StorageError;
use async_trait::async_trait;
use doe_core::Scan;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps the last stored version of every envelope
#[derive(Debug, Default)]
pub struct MemoryStorage {
    scans: RwLock<HashMap<String, Scan>>,
}

impl MemoryStorage {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored envelope with `scan_id`
    #[must_use]
    pub fn get(&self, scan_id: &str) -> Option<Scan> {
        self.scans.read().get(scan_id).cloned()
    }

    /// Every stored envelope
    #[must_use]
    pub fn all(&self) -> Vec<Scan> {
        self.scans.read().values().cloned().collect()
    }

    /// Number of stored envelopes
    #[must_use]
    pub fn len(&self) -> usize {
        self.scans.read().len()
    }

    /// Returns true if nothing was stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scans.read().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn open(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn store(&self, scan: &Scan) -> Result<(), StorageError> {
        self.scans
            .write()
            .insert(scan.scan_id().to_string(), scan.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
