//! Producer role: ingest targets and publish root scans to Kafka.

use super::{ingest, kafka_producer, publisher, require_source};
use crate::config::Config;
use anyhow::Result;
use doe_scan::shutdown_signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn execute(config: &Config) -> Result<()> {
    require_source(config)?;
    let publisher = publisher(config, kafka_producer(config)?)?;

    let token = CancellationToken::new();
    let signal = {
        let token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            token.cancel();
        })
    };

    info!(
        protocol = ?config.protocol,
        vantage_point = %config.vantage_point,
        "producer starting"
    );
    let result = ingest(config, publisher, token).await;
    signal.abort();
    result
}
