//! JSON-lines file sink.

use super::Storage;
use crate::error::StorageError;
use async_trait::async_trait;
use doe_core::Scan;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Appends one envelope per line
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileStorage {
    /// Sink writing to `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    /// Output path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn open(&self) -> Result<(), StorageError> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            debug!(path = %self.path.display(), "storage opened");
            *guard = Some(file);
        }
        Ok(())
    }

    async fn store(&self, scan: &Scan) -> Result<(), StorageError> {
        let mut line = scan
            .marshal()
            .map_err(|e| StorageError::Write(e.to_string()))?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StorageError::NotOpen)?;
        file.write_all(&line).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if let Some(mut file) = self.file.lock().await.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doe_core::{CanaryQuery, CanaryScan, ScanMetadata};

    fn scan() -> Scan {
        CanaryScan::new(
            ScanMetadata::new_root("run", "vp"),
            CanaryQuery::new("192.0.2.1", 53),
        )
        .into()
    }

    #[tokio::test]
    async fn test_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("results.jsonl"));
        storage.open().await.unwrap();
        let first = scan();
        storage.store(&first).await.unwrap();
        storage.store(&scan()).await.unwrap();
        storage.close().await.unwrap();

        let content = std::fs::read_to_string(storage.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let decoded = Scan::unmarshal(lines[0].as_bytes()).unwrap();
        assert_eq!(decoded.scan_id(), first.scan_id());
    }

    #[tokio::test]
    async fn test_store_requires_open() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("results.jsonl"));
        assert!(matches!(
            storage.store(&scan()).await,
            Err(StorageError::NotOpen)
        ));
    }
}
