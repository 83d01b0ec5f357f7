//! Kafka backend.

use super::{BrokerMessage, EventProducer, EventSource};
use crate::error::BrokerError;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::debug;

/// How long a publish may wait for queue space
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);
/// Local delivery timeout of the producer
const MESSAGE_TIMEOUT_MS: &str = "30000";

/// Kafka producer
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl std::fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProducer").finish_non_exhaustive()
    }
}

impl KafkaProducer {
    /// Connect to `bootstrap_servers`
    pub fn new(bootstrap_servers: &str) -> Result<Self, BrokerError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", MESSAGE_TIMEOUT_MS)
            .create()
            .map_err(|e| BrokerError::Client(e.to_string()))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl EventProducer for KafkaProducer {
    async fn produce(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        self.producer
            .send(record, Timeout::After(ENQUEUE_TIMEOUT))
            .await
            .map(|(partition, offset)| {
                debug!(topic, partition, offset, "delivered");
            })
            .map_err(|(e, _)| BrokerError::Produce {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let producer = self.producer.clone();
        let remaining = tokio::task::spawn_blocking(move || {
            // A flush timeout leaves messages queued; the count reports them.
            let _ = producer.flush(Timeout::After(timeout));
            producer.in_flight_count()
        })
        .await
        .unwrap_or(0);
        usize::try_from(remaining).unwrap_or_default()
    }
}

/// Kafka consumer subscribed to one topic
pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl std::fmt::Debug for KafkaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSource").finish_non_exhaustive()
    }
}

impl KafkaSource {
    /// Join `group` and subscribe to `topic`
    pub fn new(bootstrap_servers: &str, group: &str, topic: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("partition.assignment.strategy", "cooperative-sticky")
            .create()
            .map_err(|e| BrokerError::Client(e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Client(e.to_string()))?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl EventSource for KafkaSource {
    async fn read_message(&mut self, timeout: Duration) -> Result<BrokerMessage, BrokerError> {
        let message = tokio::time::timeout(timeout, self.consumer.recv())
            .await
            .map_err(|_| BrokerError::Timeout)?
            .map_err(|e| BrokerError::Consume(e.to_string()))?;
        Ok(BrokerMessage {
            topic: message.topic().to_string(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_default(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }
}
