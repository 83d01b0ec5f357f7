//! MongoDB sink, one collection per scan type.

use super::Storage;
use crate::error::StorageError;
use async_trait::async_trait;
use doe_core::Scan;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Database};
use tokio::sync::RwLock;
use tracing::info;

/// Upserts envelopes keyed by `_id = scan_id`
#[derive(Debug)]
pub struct MongoStorage {
    uri: String,
    database: String,
    db: RwLock<Option<Database>>,
}

impl MongoStorage {
    /// Sink for `database` at `uri`
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            db: RwLock::new(None),
        }
    }
}

fn to_document(scan: &Scan) -> Result<Document, StorageError> {
    let value = serde_json::to_value(scan)?;
    match Bson::try_from(value).map_err(|e| StorageError::Write(e.to_string()))? {
        Bson::Document(mut document) => {
            document.insert("_id", scan.scan_id());
            Ok(document)
        }
        other => Err(StorageError::Write(format!(
            "envelope encoded as {:?}",
            other.element_type()
        ))),
    }
}

#[async_trait]
impl Storage for MongoStorage {
    async fn open(&self) -> Result<(), StorageError> {
        let mut guard = self.db.write().await;
        if guard.is_none() {
            let client = Client::with_uri_str(&self.uri)
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            info!(database = %self.database, "connected to mongodb");
            *guard = Some(client.database(&self.database));
        }
        Ok(())
    }

    async fn store(&self, scan: &Scan) -> Result<(), StorageError> {
        let document = to_document(scan)?;
        let guard = self.db.read().await;
        let db = guard.as_ref().ok_or(StorageError::NotOpen)?;
        db.collection::<Document>(scan.scan_type().as_str())
            .replace_one(doc! { "_id": scan.scan_id() }, document)
            .upsert(true)
            .await
            .map_err(|e| StorageError::Write(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.db.write().await.take();
        Ok(())
    }
}
