//! Process handlers.
//!
//! A [`ScanHandler`] decodes one envelope, runs the probe for its scan type,
//! publishes follow-up scans and stores the finished envelope. Probe
//! failures are recorded on the envelope, never returned: negative results
//! are results.

mod ddr;
mod doe;
mod edsr;
mod lookup;
#[cfg(test)]
pub(crate) mod testing;

use crate::blocklist::Blocklist;
use crate::broker::{BrokerMessage, EventProducer};
use crate::cache::ScanRunCache;
use crate::consumer::ProcessHandler;
use crate::error::{HandlerError, ProducerError};
use crate::storage::Storage;
use async_trait::async_trait;
use doe_core::{ErrorCause, Scan, ScanError, ScanMetadata, ScanType};
use doe_probe::Probes;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Recursive resolver used for PTR lookups and EDSR seeds
pub const DEFAULT_RECURSIVE_RESOLVER: &str = "8.8.8.8";
/// Name looked up by DoH, DoT and DoQ follow-up scans
pub const DEFAULT_DOE_QUERY_NAME: &str = "example.com.";

/// Everything a handler needs besides the message
pub struct HandlerContext {
    producer: Arc<dyn EventProducer>,
    probes: Probes,
    cache: Arc<ScanRunCache>,
    blocklist: Arc<Blocklist>,
    default_resolver: String,
    doe_query_name: String,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("default_resolver", &self.default_resolver)
            .field("doe_query_name", &self.doe_query_name)
            .finish_non_exhaustive()
    }
}

impl HandlerContext {
    /// Context publishing follow-ups through `producer`
    #[must_use]
    pub fn new(producer: Arc<dyn EventProducer>, probes: Probes) -> Self {
        Self {
            producer,
            probes,
            cache: Arc::new(ScanRunCache::default()),
            blocklist: Arc::new(Blocklist::default()),
            default_resolver: DEFAULT_RECURSIVE_RESOLVER.to_string(),
            doe_query_name: DEFAULT_DOE_QUERY_NAME.to_string(),
        }
    }

    /// Share this run cache
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ScanRunCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Refuse hosts on this blocklist
    #[must_use]
    pub fn with_blocklist(mut self, blocklist: Arc<Blocklist>) -> Self {
        self.blocklist = blocklist;
        self
    }

    /// Use this recursive resolver
    #[must_use]
    pub fn with_default_resolver(mut self, resolver: impl Into<String>) -> Self {
        self.default_resolver = resolver.into();
        self
    }

    /// Look up this name in encrypted follow-up scans
    #[must_use]
    pub fn with_doe_query_name(mut self, name: impl Into<String>) -> Self {
        self.doe_query_name = name.into();
        self
    }

    async fn publish(&self, scan: &Scan) -> Result<(), ProducerError> {
        let payload = scan.marshal()?;
        self.producer
            .produce(&scan.topic(), &scan.identifier(), payload)
            .await?;
        debug!(scan_id = %scan.scan_id(), topic = %scan.topic(), "follow-up published");
        Ok(())
    }

    /// Publish a follow-up of `parent` unless the run already scheduled an
    /// identical scan. Publishing failures are recorded on the parent.
    async fn schedule(&self, parent: &mut ScanMetadata, child: Scan) -> Scheduled {
        let run_id = &child.meta().run_id;
        let content_id = child.identifier();
        if let Some(existing) = self.cache.contains_scan(run_id, &content_id) {
            debug!(
                parent = %parent.scan_id,
                existing = %existing,
                content_id = %content_id,
                "follow-up already scheduled in this run"
            );
            return Scheduled::Duplicate;
        }
        match self.publish(&child).await {
            Ok(()) => {
                self.cache.add_scan(run_id, &content_id, child.scan_id());
                Scheduled::Published
            }
            Err(e) => {
                parent.add_error(
                    ScanError::scan(ErrorCause::Producer, false, e)
                        .add_info(format!("follow-up {}", child.scan_type())),
                );
                Scheduled::Failed
            }
        }
    }

    /// Republish `retry`, a copy of a scan whose certificate failed
    /// verification, bypassing the run cache
    async fn escalate(&self, parent: &mut ScanMetadata, retry: Scan) {
        info!(
            scan_id = %parent.scan_id,
            retry_id = %retry.scan_id(),
            "certificate rejected, rescheduling without verification"
        );
        if let Err(e) = self.publish(&retry).await {
            parent.add_error(
                ScanError::scan(ErrorCause::Producer, false, e)
                    .add_info("certificate escalation"),
            );
        }
    }

    /// Run the probe for `scan` and publish its follow-ups
    async fn execute(&self, scan: &mut Scan) {
        match scan {
            Scan::Ddr(s) => self.handle_ddr(s).await,
            Scan::Edsr(s) => self.handle_edsr(s).await,
            Scan::Doh(s) => self.handle_doh(s).await,
            Scan::Dot(s) => self.handle_dot(s).await,
            Scan::Doq(s) => self.handle_doq(s).await,
            Scan::Certificate(s) => self.handle_certificate(s).await,
            Scan::Ptr(s) => self.handle_ptr(s).await,
            Scan::Resinfo(s) => self.handle_resinfo(s).await,
            Scan::Canary(s) => self.handle_canary(s).await,
            Scan::Fingerprint(s) => self.handle_fingerprint(s).await,
            Scan::DdrDnssec(s) => self.handle_ddr_dnssec(s).await,
        }
    }
}

/// Outcome of scheduling one follow-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheduled {
    Published,
    Duplicate,
    Failed,
}

/// Handles envelopes of one scan type, or of any type
#[derive(Debug, Clone)]
pub struct ScanHandler {
    context: Arc<HandlerContext>,
    expected: Option<ScanType>,
}

impl ScanHandler {
    /// Handler accepting every scan type
    #[must_use]
    pub const fn new(context: Arc<HandlerContext>) -> Self {
        Self {
            context,
            expected: None,
        }
    }

    /// Reject envelopes of other types
    #[must_use]
    pub const fn for_type(mut self, scan_type: ScanType) -> Self {
        self.expected = Some(scan_type);
        self
    }

    /// Execute a decoded envelope without storing it
    pub async fn handle(&self, scan: &mut Scan) {
        scan.meta_mut().start();
        let host = scan.target_host();
        if self.context.blocklist.contains_host(&host) {
            scan.meta_mut().add_error(ScanError::scan(
                ErrorCause::Blocked,
                false,
                format!("{host} is blocklisted"),
            ));
        } else {
            self.context.execute(scan).await;
        }
        scan.meta_mut().finish();
        log_errors(scan);
    }
}

#[async_trait]
impl ProcessHandler for ScanHandler {
    #[instrument(skip_all, fields(topic = %message.topic))]
    async fn process(
        &mut self,
        message: &BrokerMessage,
        storage: &dyn Storage,
    ) -> Result<(), HandlerError> {
        let mut scan = Scan::unmarshal(&message.payload)?;
        if let Some(expected) = self.expected {
            if scan.scan_type() != expected {
                return Err(HandlerError::WrongType {
                    expected: expected.to_string(),
                    received: scan.scan_type().to_string(),
                });
            }
        }
        self.handle(&mut scan).await;
        storage.store(&scan).await?;
        debug!(scan_id = %scan.scan_id(), "stored");
        Ok(())
    }
}

fn log_errors(scan: &Scan) {
    let scan_id = scan.scan_id();
    let scan_type = scan.scan_type();
    for e in &scan.meta().errors {
        if e.is_no_response() {
            warn!(%scan_id, %scan_type, error = %e, "no response");
        } else if e.critical {
            error!(%scan_id, %scan_type, error = %e, "scan failed");
        } else {
            info!(%scan_id, %scan_type, error = %e, "scan error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{fixture, Fixture};
    use super::*;
    use doe_core::{CanaryQuery, CanaryScan};

    fn canary(host: &str) -> Scan {
        CanaryScan::new(ScanMetadata::new_root("run-1", "vp1"), CanaryQuery::new(host, 53)).into()
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_not_stored() {
        let Fixture { context, storage, .. } = fixture();
        let mut handler = ScanHandler::new(context);
        let message = BrokerMessage {
            topic: "ddr-scan-vp1".into(),
            key: String::new(),
            payload: b"{\"type\":\"ddr\"".to_vec(),
        };
        assert!(matches!(
            handler.process(&message, storage.as_ref()).await,
            Err(HandlerError::Decode(_))
        ));
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_rejected() {
        let Fixture { context, storage, .. } = fixture();
        let mut handler = ScanHandler::new(context).for_type(ScanType::Ddr);
        let message = BrokerMessage {
            topic: "ddr-scan-vp1".into(),
            key: String::new(),
            payload: canary("192.0.2.1").marshal().unwrap(),
        };
        assert!(matches!(
            handler.process(&message, storage.as_ref()).await,
            Err(HandlerError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_blocklisted_host_is_stored_with_error() {
        let Fixture { context, storage, .. } = fixture();
        let context = Arc::new(
            Arc::try_unwrap(context)
                .unwrap()
                .with_blocklist(Arc::new(Blocklist::parse("192.0.2.0/24"))),
        );
        let mut handler = ScanHandler::new(context);
        let scan = canary("192.0.2.1");
        let message = BrokerMessage {
            topic: scan.topic(),
            key: scan.identifier(),
            payload: scan.marshal().unwrap(),
        };
        handler.process(&message, storage.as_ref()).await.unwrap();

        let stored = storage.get(scan.scan_id()).unwrap();
        let errors = &stored.meta().errors;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].cause, ErrorCause::Blocked);
        assert!(!errors[0].critical);
        assert!(stored.meta().is_finished());
        let Scan::Canary(canary) = stored else {
            panic!("expected a canary scan");
        };
        assert!(canary.result.is_none());
    }
}
