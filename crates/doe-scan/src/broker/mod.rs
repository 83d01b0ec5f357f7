//! Message broker seam.
//!
//! Producers publish opaque payloads keyed for partitioning; sources hand
//! out one message at a time with a bounded wait. Delivery is at least once,
//! so handlers must tolerate duplicates.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use crate::error::BrokerError;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::{MemoryBroker, MemorySource};

/// A message read from a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic it was published on
    pub topic: String,
    /// Partition key
    pub key: String,
    /// Payload, a JSON scan envelope
    pub payload: Vec<u8>,
}

/// Publishes messages
#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Publish `payload` on `topic`, partitioned by `key`
    async fn produce(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for queued messages; returns how many remain
    async fn flush(&self, timeout: Duration) -> usize;
}

/// Reads messages from one subscribed topic
#[async_trait]
pub trait EventSource: Send {
    /// Next message, or [`BrokerError::Timeout`] if none arrives in time
    async fn read_message(&mut self, timeout: Duration) -> Result<BrokerMessage, BrokerError>;
}
