//! Role implementations and the wiring they share.

pub mod consumer;
pub mod producer;
pub mod standalone;

use crate::config::Config;
use anyhow::{bail, Context as _, Result};
use doe_core::{CoreError, Scan};
use doe_probe::Probes;
use doe_scan::producer::factory_for;
use doe_scan::{
    Blocklist, BrokerError, ConsumerError, ConsumerFactory, EventProducer, EventSource,
    FileProducer, FileStorage, HandlerContext, ParallelConsumer, ProcessHandler, Publisher,
    ScanFactory, ScanHandler, ScanRunCache, Storage, TargetLine, WatchDirectoryProducer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Opens a broker subscription for a topic
pub type Subscriber =
    Box<dyn Fn(&str) -> Result<Box<dyn EventSource>, BrokerError> + Send + Sync>;

/// Database holding one collection per scan type
#[cfg(feature = "mongo")]
const MONGO_DATABASE: &str = "doe";

pub fn blocklist(config: &Config) -> Result<Arc<Blocklist>> {
    let list = Blocklist::load(&config.blocklist_file_path).with_context(|| {
        format!(
            "cannot read blocklist {}",
            config.blocklist_file_path.display()
        )
    })?;
    Ok(Arc::new(list))
}

/// Everything the handlers share: probes, run cache, blocklist and the
/// producer for follow-up scans
pub fn handler_context(
    config: &Config,
    producer: Arc<dyn EventProducer>,
) -> Result<Arc<HandlerContext>> {
    let context = HandlerContext::new(producer, Probes::network(&config.probe_config()))
        .with_cache(Arc::new(ScanRunCache::new(config.scan_cache_ttl())))
        .with_blocklist(blocklist(config)?)
        .with_default_resolver(config.default_recursive_resolver.as_str())
        .with_doe_query_name(config.doe_query_name.as_str());
    Ok(Arc::new(context))
}

/// Result sink: MongoDB when MONGO_SERVER is set, else the JSON-lines file
pub fn storage(config: &Config) -> Result<Arc<dyn Storage>> {
    match &config.mongo_server {
        Some(uri) => mongo_storage(uri),
        None => Ok(Arc::new(FileStorage::new(&config.storage_path))),
    }
}

#[cfg(feature = "mongo")]
fn mongo_storage(uri: &str) -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(doe_scan::storage::mongo::MongoStorage::new(
        uri,
        MONGO_DATABASE,
    )))
}

#[cfg(not(feature = "mongo"))]
fn mongo_storage(_uri: &str) -> Result<Arc<dyn Storage>> {
    bail!("MONGO_SERVER is set but this build has no MongoDB support (feature `mongo`)")
}

#[cfg(feature = "kafka")]
pub fn kafka_producer(config: &Config) -> Result<Arc<dyn EventProducer>> {
    let producer = doe_scan::broker::kafka::KafkaProducer::new(&config.kafka_server)?;
    Ok(Arc::new(producer))
}

#[cfg(not(feature = "kafka"))]
pub fn kafka_producer(_config: &Config) -> Result<Arc<dyn EventProducer>> {
    bail!("this build has no Kafka support (feature `kafka`); use RUN=standalone")
}

#[cfg(feature = "kafka")]
pub fn kafka_subscriber(config: &Config) -> Result<Subscriber> {
    let servers = config.kafka_server.clone();
    let group = config.consumer_group.clone();
    Ok(Box::new(move |topic: &str| -> Result<Box<dyn EventSource>, BrokerError> {
        let source = doe_scan::broker::kafka::KafkaSource::new(&servers, &group, topic)?;
        Ok(Box::new(source))
    }))
}

#[cfg(not(feature = "kafka"))]
pub fn kafka_subscriber(_config: &Config) -> Result<Subscriber> {
    bail!("this build has no Kafka support (feature `kafka`); use RUN=standalone")
}

/// One worker pool over every selected scan type, with THREADS workers per
/// type (or its override), each subscribed to its type's topic
pub fn consumer_pool(
    config: &Config,
    context: Arc<HandlerContext>,
    storage: Arc<dyn Storage>,
    subscribe: Subscriber,
) -> ParallelConsumer {
    let slots: Vec<_> = config
        .protocol
        .scan_types()
        .into_iter()
        .flat_map(|t| std::iter::repeat(t).take(config.threads_for(t)))
        .collect();
    let concurrency = slots.len();
    let vantage_point = config.vantage_point.clone();

    let factory: ConsumerFactory = Box::new(
        move |n: usize| -> Result<(Box<dyn EventSource>, Box<dyn ProcessHandler>), ConsumerError> {
            let scan_type = *slots
                .get(n)
                .ok_or_else(|| ConsumerError::Setup(format!("no consumer slot {n}")))?;
            let source = subscribe(&scan_type.topic(&vantage_point))?;
            let handler = ScanHandler::new(context.clone()).for_type(scan_type);
            Ok((source, Box::new(handler)))
        },
    );
    ParallelConsumer::new(factory, concurrency, storage).with_read_timeout(config.read_timeout())
}

/// Factory for the selected root scan types; with several, each line
/// yields the scans of all of them
pub fn scan_factory(config: &Config) -> Result<ScanFactory> {
    let settings = config.factory_settings();
    let mut factories: Vec<ScanFactory> = config
        .protocol
        .scan_types()
        .into_iter()
        .filter_map(|t| factory_for(t, &settings))
        .collect();
    match factories.len() {
        0 => bail!(
            "{:?} scans are scheduled by other scans and cannot be ingested",
            config.protocol
        ),
        1 => Ok(factories.remove(0)),
        _ => Ok(Arc::new(
            move |line: &TargetLine<'_>, run_id: &str, vp: &str| -> Result<Vec<Scan>, CoreError> {
                let mut scans = Vec::new();
                for factory in &factories {
                    scans.extend(factory(line, run_id, vp)?);
                }
                Ok(scans)
            },
        )),
    }
}

pub fn publisher(config: &Config, producer: Arc<dyn EventProducer>) -> Result<Arc<Publisher>> {
    let publisher = Publisher::new(producer, scan_factory(config)?, &config.vantage_point)
        .with_blocklist(blocklist(config)?)
        .with_ip_version(config.ip_version)
        .with_rate_limit(config.producer_rate_limit);
    Ok(Arc::new(publisher))
}

/// Fails unless an ingestion source is configured
pub fn require_source(config: &Config) -> Result<()> {
    if config.producer_from_file.is_none() && config.producer_watch_directory.is_none() {
        bail!("set PRODUCER_FROM_FILE or PRODUCER_WATCH_DIRECTORY");
    }
    Ok(())
}

/// Run the configured ingester. A watched directory is followed until
/// `token` is cancelled.
pub async fn ingest(
    config: &Config,
    publisher: Arc<Publisher>,
    token: CancellationToken,
) -> Result<()> {
    require_source(config)?;
    if let Some(path) = &config.producer_from_file {
        let published = FileProducer::new(publisher)
            .run(path)
            .await
            .with_context(|| format!("cannot ingest {}", path.display()))?;
        info!(path = %path.display(), published, "ingestion finished");
    } else if let Some(dir) = &config.producer_watch_directory {
        WatchDirectoryProducer::new(publisher)
            .with_wait_until_exit(config.wait_until_exit())
            .run(dir, token)
            .await
            .with_context(|| format!("cannot watch {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use clap::Parser;
    use doe_core::ScanType;
    use doe_scan::MemoryBroker;

    fn config(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("doe-scanner").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_all_protocols_ingest_every_root_type() {
        let config = config(&["--protocol", "all", "--vantage-point", "vp1"]);
        let factory = scan_factory(&config).unwrap();
        let line = TargetLine::parse("192.0.2.1,dns.example.").unwrap();
        let scans = factory(&line, "run-1", "vp1").unwrap();
        assert!(scans.iter().all(|s| s.target_host() == "192.0.2.1"));
        let mut types: Vec<ScanType> = scans.iter().map(Scan::scan_type).collect();
        types.dedup();
        assert_eq!(
            types,
            ScanType::ALL
                .into_iter()
                .filter(|t| t.is_root())
                .collect::<Vec<_>>()
        );
        // One EDSR scan per protocol.
        assert_eq!(
            scans.iter().filter(|s| s.scan_type() == ScanType::Edsr).count(),
            3
        );
    }

    #[test]
    fn test_derived_protocol_cannot_be_ingested() {
        let config = config(&["--protocol", "doh"]);
        assert_eq!(config.protocol, Protocol::Doh);
        assert!(scan_factory(&config).is_err());
    }

    #[test]
    fn test_source_required() {
        assert!(require_source(&config(&[])).is_err());
        assert!(require_source(&config(&["--producer-from-file", "targets.csv"])).is_ok());
    }

    #[tokio::test]
    async fn test_file_ingestion_through_publisher() {
        let dir = tempfile::tempdir().unwrap();
        let targets = dir.path().join("targets.csv");
        std::fs::write(&targets, "192.0.2.1\n10.0.0.1\n2001:db8::1\n").unwrap();
        let blocklist = dir.path().join("blocklist.conf");
        std::fs::write(&blocklist, "10.0.0.0/8\n").unwrap();

        let config = config(&[
            "--producer-from-file",
            targets.to_str().unwrap(),
            "--blocklist-file-path",
            blocklist.to_str().unwrap(),
            "--ip-version",
            "ipv4",
            "--vantage-point",
            "vp1",
        ]);
        let broker = MemoryBroker::new();
        let publisher = publisher(&config, Arc::new(broker.clone())).unwrap();
        ingest(&config, publisher, CancellationToken::new()).await.unwrap();

        let pending = broker.pending("ddr-scan-vp1");
        assert_eq!(pending.len(), 1);
        let scan = Scan::unmarshal(&pending[0].payload).unwrap();
        assert_eq!(scan.target_host(), "192.0.2.1");
    }
}
