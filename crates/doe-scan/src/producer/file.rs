//! One-shot ingestion of a target file.

use super::Publisher;
use crate::error::ProducerError;
use doe_core::new_id;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Publishes one scan set per line of a file under a fresh run
#[derive(Debug, Clone)]
pub struct FileProducer {
    publisher: Arc<Publisher>,
}

impl FileProducer {
    /// Producer publishing through `publisher`
    #[must_use]
    pub const fn new(publisher: Arc<Publisher>) -> Self {
        Self { publisher }
    }

    /// Ingest `path` and flush; returns the number of scans published.
    ///
    /// A line that fails to build or publish is logged and skipped.
    pub async fn run(&self, path: &Path) -> Result<usize, ProducerError> {
        let run_id = new_id();
        let file = File::open(path).await?;
        let mut lines = BufReader::new(file).lines();
        info!(path = %path.display(), run_id = %run_id, "ingesting file");

        let mut published = 0;
        while let Some(line) = lines.next_line().await? {
            match self.publisher.publish_line(&line, &run_id).await {
                Ok(n) => published += n,
                Err(e) => warn!(line = %line.trim(), error = %e, "failed to publish"),
            }
        }
        self.publisher.flush_all().await?;
        info!(path = %path.display(), published, "file ingested");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::producer::{factory_for, FactorySettings};
    use doe_core::{Scan, ScanType};
    use std::io::Write;

    #[tokio::test]
    async fn test_file_ingestion_shares_run() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "8.8.8.8\n\n1.1.1.1\n9.9.9.9").unwrap();

        let broker = MemoryBroker::new();
        let factory = factory_for(ScanType::Ddr, &FactorySettings::default()).unwrap();
        let publisher = Publisher::new(Arc::new(broker.clone()), factory, "vp1");
        let published = FileProducer::new(Arc::new(publisher))
            .run(file.path())
            .await
            .unwrap();
        assert_eq!(published, 3);

        let scans: Vec<Scan> = broker
            .pending("ddr-scan-vp1")
            .iter()
            .map(|m| Scan::unmarshal(&m.payload).unwrap())
            .collect();
        assert_eq!(scans.len(), 3);
        assert!(scans.iter().all(|s| s.meta().run_id == scans[0].meta().run_id));
        assert_eq!(scans[2].target_host(), "9.9.9.9");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let broker = MemoryBroker::new();
        let factory = factory_for(ScanType::Ddr, &FactorySettings::default()).unwrap();
        let producer = FileProducer::new(Arc::new(Publisher::new(Arc::new(broker), factory, "vp")));
        assert!(matches!(
            producer.run(Path::new("/nonexistent/targets.csv")).await,
            Err(ProducerError::Io(_))
        ));
    }
}
