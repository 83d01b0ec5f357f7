//! Ingesters turning target lists into root scans.
//!
//! Lines are split once into a [`TargetLine`]. A [`ScanFactory`] turns it
//! into zero or more envelopes; a [`Publisher`] filters lines, builds scans
//! and publishes them on their vantage-point topics.

pub mod file;
pub mod watch;

use crate::blocklist::Blocklist;
use crate::broker::EventProducer;
use crate::error::ProducerError;
use doe_core::{
    CanaryQuery, CanaryScan, CoreError, DdrDnssecQuery, DdrDnssecScan, DdrQuery, DdrScan,
    EdsrQuery, EdsrScan, FingerprintQuery, FingerprintScan, ResinfoQuery, ResinfoScan, Scan,
    ScanMetadata, ScanType,
};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use file::FileProducer;
pub use watch::WatchDirectoryProducer;

/// Port of the unencrypted resolvers named in target lists
pub const RESOLVER_PORT: u16 = 53;
/// Name whose RESINFO is asked when a line names none
pub const DEFAULT_RESINFO_TARGET: &str = "resolver.arpa.";
/// Flush attempts after the last line
pub const FLUSH_ATTEMPTS: usize = 10;
/// Wait per flush attempt
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Builds the scans for one input line: `(line, run_id, vantage_point)`
pub type ScanFactory =
    Arc<dyn Fn(&TargetLine<'_>, &str, &str) -> Result<Vec<Scan>, CoreError> + Send + Sync>;

/// One `host[,target]` line of a target list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLine<'a> {
    /// Resolver to scan; the filters apply to it
    pub host: &'a str,
    /// Name to ask about, only read by factories that take one
    pub target: Option<&'a str>,
}

impl<'a> TargetLine<'a> {
    /// Split a raw line, `None` when it names no host
    #[must_use]
    pub fn parse(line: &'a str) -> Option<Self> {
        let (host, target) = match line.split_once(',') {
            Some((host, target)) => (host.trim(), Some(target.trim()).filter(|t| !t.is_empty())),
            None => (line.trim(), None),
        };
        (!host.is_empty()).then_some(Self { host, target })
    }
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Address families admitted by an ingester
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 literals only
    Ipv4,
    /// IPv6 literals only
    Ipv6,
    /// Everything
    #[default]
    All,
}

impl IpVersion {
    /// Returns true if `target` may be ingested.
    ///
    /// Host names carry no family and are always admitted.
    #[must_use]
    pub fn admits(self, target: &str) -> bool {
        match (self, target.parse::<IpAddr>()) {
            (Self::All, _) | (_, Err(_)) => true,
            (Self::Ipv4, Ok(addr)) => addr.is_ipv4(),
            (Self::Ipv6, Ok(addr)) => addr.is_ipv6(),
        }
    }
}

impl FromStr for IpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ipv4" | "4" => Ok(Self::Ipv4),
            "ipv6" | "6" => Ok(Self::Ipv6),
            "all" | "" => Ok(Self::All),
            other => Err(format!("unknown ip version '{other}'")),
        }
    }
}

/// Settings the standard factories need beyond the line itself
#[derive(Debug, Clone)]
pub struct FactorySettings {
    /// Recursive resolver used by EDSR to resolve its seed
    pub default_resolver: String,
    /// ALPN identifiers chased by EDSR, one scan each
    pub edsr_protocols: Vec<String>,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            default_resolver: "8.8.8.8".to_string(),
            edsr_protocols: vec!["h2".into(), "dot".into(), "doq".into()],
        }
    }
}

fn ddr_scans(line: &TargetLine<'_>, run_id: &str, vp: &str) -> Result<Vec<Scan>, CoreError> {
    let query = DdrQuery::new(line.host, RESOLVER_PORT)?;
    Ok(vec![DdrScan::new(ScanMetadata::new_root(run_id, vp), query).into()])
}

fn ddr_dnssec_scans(
    line: &TargetLine<'_>,
    run_id: &str,
    vp: &str,
) -> Result<Vec<Scan>, CoreError> {
    let query = DdrDnssecQuery::new(line.host, RESOLVER_PORT)?;
    Ok(vec![DdrDnssecScan::new(ScanMetadata::new_root(run_id, vp), query).into()])
}

fn canary_scans(line: &TargetLine<'_>, run_id: &str, vp: &str) -> Result<Vec<Scan>, CoreError> {
    let query = CanaryQuery::new(line.host, RESOLVER_PORT);
    Ok(vec![CanaryScan::new(ScanMetadata::new_root(run_id, vp), query).into()])
}

fn fingerprint_scans(
    line: &TargetLine<'_>,
    run_id: &str,
    vp: &str,
) -> Result<Vec<Scan>, CoreError> {
    let query = FingerprintQuery::new(line.host, RESOLVER_PORT);
    Ok(vec![FingerprintScan::new(ScanMetadata::new_root(run_id, vp), query).into()])
}

fn resinfo_scans(line: &TargetLine<'_>, run_id: &str, vp: &str) -> Result<Vec<Scan>, CoreError> {
    let target = line.target.unwrap_or(DEFAULT_RESINFO_TARGET);
    let query = ResinfoQuery::new(line.host, RESOLVER_PORT, target)?;
    Ok(vec![ResinfoScan::new(ScanMetadata::new_root(run_id, vp), query).into()])
}

/// Standard factory for a root scan type, `None` for derived types
#[must_use]
pub fn factory_for(scan_type: ScanType, settings: &FactorySettings) -> Option<ScanFactory> {
    let factory: ScanFactory = match scan_type {
        ScanType::Ddr => Arc::new(ddr_scans),
        ScanType::DdrDnssec => Arc::new(ddr_dnssec_scans),
        ScanType::Canary => Arc::new(canary_scans),
        ScanType::Fingerprint => Arc::new(fingerprint_scans),
        ScanType::Resinfo => Arc::new(resinfo_scans),
        ScanType::Edsr => {
            let resolver = settings.default_resolver.clone();
            let protocols = settings.edsr_protocols.clone();
            Arc::new(
                move |line: &TargetLine<'_>, run_id: &str, vp: &str| -> Result<Vec<Scan>, CoreError> {
                    Ok(protocols
                        .iter()
                        .map(|protocol| {
                            let query =
                                EdsrQuery::new(line.host, protocol.as_str(), resolver.as_str());
                            Scan::from(EdsrScan::new(ScanMetadata::new_root(run_id, vp), query))
                        })
                        .collect())
                },
            )
        }
        ScanType::Doh
        | ScanType::Dot
        | ScanType::Doq
        | ScanType::Certificate
        | ScanType::Ptr => return None,
    };
    Some(factory)
}

/// Filters lines, builds scans and publishes them
pub struct Publisher {
    producer: Arc<dyn EventProducer>,
    factory: ScanFactory,
    vantage_point: String,
    blocklist: Arc<Blocklist>,
    ip_version: IpVersion,
    limiter: Option<Limiter>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("vantage_point", &self.vantage_point)
            .field("ip_version", &self.ip_version)
            .field("rate_limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Publisher stamping `vantage_point` into every scan
    pub fn new(
        producer: Arc<dyn EventProducer>,
        factory: ScanFactory,
        vantage_point: impl Into<String>,
    ) -> Self {
        Self {
            producer,
            factory,
            vantage_point: vantage_point.into(),
            blocklist: Arc::new(Blocklist::default()),
            ip_version: IpVersion::All,
            limiter: None,
        }
    }

    /// Skip lines on this blocklist
    #[must_use]
    pub fn with_blocklist(mut self, blocklist: Arc<Blocklist>) -> Self {
        self.blocklist = blocklist;
        self
    }

    /// Admit only this address family
    #[must_use]
    pub const fn with_ip_version(mut self, ip_version: IpVersion) -> Self {
        self.ip_version = ip_version;
        self
    }

    /// Publish at most `per_second` scans per second; zero disables the limit
    #[must_use]
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(per_second).map(|n| RateLimiter::direct(Quota::per_second(n)));
        self
    }

    /// Vantage point stamped into scans
    #[must_use]
    pub fn vantage_point(&self) -> &str {
        &self.vantage_point
    }

    /// Build and publish the scans for one line.
    ///
    /// Returns how many were published; empty, blocklisted and filtered
    /// lines publish nothing.
    pub async fn publish_line(&self, line: &str, run_id: &str) -> Result<usize, ProducerError> {
        let Some(line) = TargetLine::parse(line) else {
            return Ok(0);
        };
        if self.blocklist.contains_host(line.host) {
            debug!(target = line.host, "skipping blocklisted target");
            return Ok(0);
        }
        if !self.ip_version.admits(line.host) {
            debug!(target = line.host, "skipping target of other address family");
            return Ok(0);
        }

        let scans = (self.factory)(&line, run_id, &self.vantage_point)?;
        let mut published = 0;
        for scan in scans {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }
            let payload = scan.marshal()?;
            self.producer
                .produce(&scan.topic(), &scan.identifier(), payload)
                .await?;
            debug!(scan_id = %scan.scan_id(), topic = %scan.topic(), "published");
            published += 1;
        }
        Ok(published)
    }

    /// Flush the broker, retrying up to [`FLUSH_ATTEMPTS`] times
    pub async fn flush_all(&self) -> Result<(), ProducerError> {
        let mut remaining = 0;
        for attempt in 1..=FLUSH_ATTEMPTS {
            remaining = self.producer.flush(FLUSH_TIMEOUT).await;
            if remaining == 0 {
                return Ok(());
            }
            debug!(attempt, remaining, "messages still queued");
        }
        warn!(remaining, "messages not delivered after final flush");
        Err(ProducerError::Undelivered { remaining })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    fn publisher(broker: &MemoryBroker, scan_type: ScanType) -> Publisher {
        let factory = factory_for(scan_type, &FactorySettings::default()).unwrap();
        Publisher::new(Arc::new(broker.clone()), factory, "vp1")
    }

    #[test]
    fn test_ip_version_admits() {
        assert!(IpVersion::Ipv4.admits("8.8.8.8"));
        assert!(!IpVersion::Ipv4.admits("2001:4860:4860::8888"));
        assert!(IpVersion::Ipv6.admits("2001:4860:4860::8888"));
        assert!(IpVersion::Ipv6.admits("dns.google"));
        assert_eq!("IPv6".parse::<IpVersion>().unwrap(), IpVersion::Ipv6);
        assert!("ipv5".parse::<IpVersion>().is_err());
    }

    #[test]
    fn test_no_factory_for_derived_types() {
        let settings = FactorySettings::default();
        assert!(factory_for(ScanType::Doh, &settings).is_none());
        assert!(factory_for(ScanType::Ptr, &settings).is_none());
        assert!(ScanType::ALL
            .into_iter()
            .filter(|t| t.is_root())
            .all(|t| factory_for(t, &settings).is_some()));
    }

    #[tokio::test]
    async fn test_publish_line() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, ScanType::Ddr);
        assert_eq!(publisher.publish_line("  8.8.8.8 \n", "run-1").await.unwrap(), 1);
        assert_eq!(publisher.publish_line("", "run-1").await.unwrap(), 0);

        let messages = broker.pending("ddr-scan-vp1");
        assert_eq!(messages.len(), 1);
        let scan = Scan::unmarshal(&messages[0].payload).unwrap();
        assert_eq!(scan.meta().run_id, "run-1");
        assert_eq!(scan.meta().vantage_point, "vp1");
        assert_eq!(scan.target_host(), "8.8.8.8");
        assert_eq!(messages[0].key, scan.identifier());
    }

    #[tokio::test]
    async fn test_filters() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, ScanType::Canary)
            .with_blocklist(Arc::new(Blocklist::parse("10.0.0.0/8")))
            .with_ip_version(IpVersion::Ipv4);
        assert_eq!(publisher.publish_line("10.0.0.1", "r").await.unwrap(), 0);
        assert_eq!(publisher.publish_line("2001:db8::1", "r").await.unwrap(), 0);
        assert_eq!(publisher.publish_line("192.0.2.1", "r").await.unwrap(), 1);
        assert_eq!(broker.pending("canary-scan-vp1").len(), 1);
    }

    #[tokio::test]
    async fn test_edsr_one_scan_per_protocol() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, ScanType::Edsr);
        assert_eq!(publisher.publish_line("dns.google.", "r").await.unwrap(), 3);
        let protocols: Vec<String> = broker
            .pending("edsr-scan-vp1")
            .iter()
            .map(|m| match Scan::unmarshal(&m.payload).unwrap() {
                Scan::Edsr(scan) => scan.query.protocol,
                other => panic!("unexpected {:?}", other.scan_type()),
            })
            .collect();
        assert_eq!(protocols, vec!["h2", "dot", "doq"]);
    }

    #[tokio::test]
    async fn test_resinfo_target_column() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, ScanType::Resinfo);
        publisher.publish_line("9.9.9.9,dns.quad9.net.", "r").await.unwrap();
        publisher.publish_line("1.1.1.1", "r").await.unwrap();
        let targets: Vec<String> = broker
            .pending("resinfo-scan-vp1")
            .iter()
            .map(|m| match Scan::unmarshal(&m.payload).unwrap() {
                Scan::Resinfo(scan) => scan.query.target_name,
                other => panic!("unexpected {:?}", other.scan_type()),
            })
            .collect();
        assert_eq!(targets, vec!["dns.quad9.net.", DEFAULT_RESINFO_TARGET]);
    }

    #[test]
    fn test_target_line_parse() {
        let line = TargetLine::parse(" 9.9.9.9 , dns.quad9.net. \n").unwrap();
        assert_eq!(line.host, "9.9.9.9");
        assert_eq!(line.target, Some("dns.quad9.net."));
        assert_eq!(TargetLine::parse("9.9.9.9,").unwrap().target, None);
        assert_eq!(TargetLine::parse("8.8.8.8").unwrap().target, None);
        assert!(TargetLine::parse("  ").is_none());
        assert!(TargetLine::parse(",dns.quad9.net.").is_none());
    }

    #[tokio::test]
    async fn test_target_column_ignored_without_resinfo() {
        let broker = MemoryBroker::new();
        let ddr = publisher(&broker, ScanType::Ddr).with_ip_version(IpVersion::Ipv4);
        let line = "192.0.2.1,resolver.example.";
        assert_eq!(ddr.publish_line(line, "r").await.unwrap(), 1);
        assert_eq!(ddr.publish_line("2001:db8::1,resolver.example.", "r").await.unwrap(), 0);

        let messages = broker.pending("ddr-scan-vp1");
        let scan = Scan::unmarshal(&messages[0].payload).unwrap();
        assert_eq!(scan.target_host(), "192.0.2.1");

        let edsr = publisher(&broker, ScanType::Edsr);
        assert_eq!(edsr.publish_line("dns.google.,unused.", "r").await.unwrap(), 3);
        assert!(broker
            .pending("edsr-scan-vp1")
            .iter()
            .all(|m| Scan::unmarshal(&m.payload).unwrap().target_host() == "dns.google."));
    }

    #[tokio::test]
    async fn test_rate_limited_publisher() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, ScanType::Ddr).with_rate_limit(1000);
        for _ in 0..3 {
            publisher.publish_line("8.8.8.8", "r").await.unwrap();
        }
        assert_eq!(broker.pending("ddr-scan-vp1").len(), 3);
        publisher.flush_all().await.unwrap();
    }
}
