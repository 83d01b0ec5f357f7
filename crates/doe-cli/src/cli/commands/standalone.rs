//! Standalone role: ingester and worker pool in one process, connected by an
//! in-memory broker.
//!
//! A watched directory runs until the process is signalled. A one-shot file
//! run exits once every topic has stayed empty for [`IDLE_GRACE`].

use super::{consumer_pool, handler_context, ingest, publisher, require_source, storage};
use crate::config::Config;
use anyhow::{Context as _, Result};
use doe_scan::{EventProducer, EventSource, MemoryBroker};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Time every topic must stay empty before a one-shot run exits
pub const IDLE_GRACE: Duration = Duration::from_secs(30);

const IDLE_POLL: Duration = Duration::from_millis(500);

pub async fn execute(config: &Config) -> Result<()> {
    require_source(config)?;
    let broker = MemoryBroker::new();
    let producer: Arc<dyn EventProducer> = Arc::new(broker.clone());

    let context = handler_context(config, producer.clone())?;
    let subscriber = {
        let broker = broker.clone();
        Box::new(move |topic: &str| -> Result<Box<dyn EventSource>, doe_scan::BrokerError> {
            Ok(Box::new(broker.subscribe(topic)))
        })
    };
    let pool = consumer_pool(config, context, storage(config)?, subscriber);

    let token = CancellationToken::new();
    let consumers = tokio::spawn(pool.run(token.clone()));
    info!(
        protocol = ?config.protocol,
        vantage_point = %config.vantage_point,
        "standalone scanner started"
    );

    let ingested = ingest(config, publisher(config, producer)?, token.clone()).await;
    if ingested.is_ok() && config.producer_from_file.is_some() {
        drained(&broker, &token, IDLE_GRACE).await;
    }
    token.cancel();

    consumers.await.context("consumer pool panicked")??;
    ingested
}

/// Resolves once every topic has been empty for `grace`, or on cancel
async fn drained(broker: &MemoryBroker, token: &CancellationToken, grace: Duration) {
    let mut idle_since: Option<Instant> = None;
    loop {
        let empty = broker.topics().iter().all(|t| broker.pending(t).is_empty());
        match (empty, idle_since) {
            (false, _) => idle_since = None,
            (true, None) => idle_since = Some(Instant::now()),
            (true, Some(since)) if since.elapsed() >= grace => {
                info!("all topics drained");
                return;
            }
            (true, Some(_)) => {}
        }
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(IDLE_POLL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[tokio::test(start_paused = true)]
    async fn test_drained_waits_for_empty_topics() {
        let broker = MemoryBroker::new();
        broker.produce("ddr-scan-vp1", "k", b"{}".to_vec()).await.unwrap();
        let token = CancellationToken::new();

        let waiter = {
            let broker = broker.clone();
            let token = token.clone();
            tokio::spawn(async move { drained(&broker, &token, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        broker.drain("ddr-scan-vp1");
        let finished = tokio::time::timeout(Duration::from_secs(4), waiter).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_requires_source() {
        let config = Config::try_parse_from(["doe-scanner"]).unwrap();
        assert!(execute(&config).await.is_err());
    }
}
