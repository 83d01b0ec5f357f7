//! Result sinks.
//!
//! `store` is the commit point of a scan. The same envelope may be stored
//! more than once under redelivery, so every sink keys by `scan_id` or
//! tolerates duplicates.

pub mod file;
pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;

use crate::error::StorageError;
use async_trait::async_trait;
use doe_core::Scan;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// A result sink shared by every consumer of a pool
#[async_trait]
pub trait Storage: Send + Sync {
    /// Acquire the underlying resource
    async fn open(&self) -> Result<(), StorageError>;

    /// Persist one finished envelope
    async fn store(&self, scan: &Scan) -> Result<(), StorageError>;

    /// Release the underlying resource
    async fn close(&self) -> Result<(), StorageError>;
}
