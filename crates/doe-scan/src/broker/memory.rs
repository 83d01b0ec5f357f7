//! In-process broker.
//!
//! One queue per topic shared by every subscriber of that topic, so each
//! message goes to exactly one consumer, as with a single consumer group.

use super::{BrokerMessage, EventProducer, EventSource};
use crate::error::BrokerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Topic {
    queue: Mutex<VecDeque<BrokerMessage>>,
    ready: Notify,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    closed: AtomicBool,
}

/// Shared in-memory broker; clones are handles to the same queues
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("topics", &self.inner.topics.lock().len())
            .finish()
    }
}

impl MemoryBroker {
    /// Create an empty broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.inner
            .topics
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Subscribe to `topic`
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> MemorySource {
        MemorySource {
            broker: self.clone(),
            topic: self.topic(topic),
        }
    }

    /// Messages waiting on `topic`, oldest first, without consuming them
    #[must_use]
    pub fn pending(&self, topic: &str) -> Vec<BrokerMessage> {
        self.topic(topic).queue.lock().iter().cloned().collect()
    }

    /// Remove and return every message waiting on `topic`
    pub fn drain(&self, topic: &str) -> Vec<BrokerMessage> {
        self.topic(topic).queue.lock().drain(..).collect()
    }

    /// Names of topics that have been used
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Reject further publishes and wake every reader
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for topic in self.inner.topics.lock().values() {
            topic.ready.notify_waiters();
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventProducer for MemoryBroker {
    async fn produce(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let queue = self.topic(topic);
        queue.queue.lock().push_back(BrokerMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        });
        queue.ready.notify_one();
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> usize {
        0
    }
}

/// Subscription to one topic of a [`MemoryBroker`]
pub struct MemorySource {
    broker: MemoryBroker,
    topic: Arc<Topic>,
}

impl std::fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySource").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn read_message(&mut self, timeout: Duration) -> Result<BrokerMessage, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.topic.queue.lock().pop_front() {
                return Ok(message);
            }
            if self.broker.is_closed() {
                return Err(BrokerError::Closed);
            }
            if tokio::time::timeout_at(deadline, self.topic.ready.notified())
                .await
                .is_err()
            {
                return Err(BrokerError::Timeout);
            }
        }
    }
}
