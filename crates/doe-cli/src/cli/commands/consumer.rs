//! Consumer role: execute scans read from Kafka.

use super::{consumer_pool, handler_context, kafka_producer, kafka_subscriber, storage};
use crate::config::Config;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn execute(config: &Config) -> Result<()> {
    let producer = kafka_producer(config)?;
    let context = handler_context(config, producer)?;
    let pool = consumer_pool(config, context, storage(config)?, kafka_subscriber(config)?);

    info!(
        protocol = ?config.protocol,
        vantage_point = %config.vantage_point,
        group = %config.consumer_group,
        "consumer starting"
    );
    pool.run(CancellationToken::new()).await?;
    info!("consumer stopped");
    Ok(())
}
