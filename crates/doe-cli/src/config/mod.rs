//! Process configuration, read from flags or the environment.

use clap::{Parser, ValueEnum};
use doe_core::ScanType;
use doe_probe::ProbeConfig;
use doe_scan::producer::FactorySettings;
use doe_scan::IpVersion;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Distributed encrypted-DNS measurement scanner
///
/// Every option can also be set through the environment variable named
/// next to it.
#[derive(Parser, Debug, Clone)]
#[command(name = "doe-scanner")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Process role
    #[arg(long, env = "RUN", value_enum, default_value = "standalone")]
    pub run: Role,

    /// Scan type to ingest or execute
    #[arg(long, env = "PROTOCOL", value_enum, default_value = "ddr")]
    pub protocol: Protocol,

    /// Address family admitted by the ingesters: ipv4, ipv6 or all
    #[arg(long, env = "IP_VERSION", default_value = "all")]
    pub ip_version: IpVersion,

    /// Kafka bootstrap servers
    #[arg(long, env = "KAFKA_SERVER", default_value = "localhost:9092")]
    pub kafka_server: String,

    /// MongoDB connection string; results go to STORAGE_PATH when unset
    #[arg(long, env = "MONGO_SERVER")]
    pub mongo_server: Option<String>,

    /// Label appended to topic names and stamped into every scan
    #[arg(long, env = "VANTAGE_POINT", default_value = "local")]
    pub vantage_point: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Workers per scan type
    #[arg(long, env = "THREADS", default_value_t = 1)]
    pub threads: usize,

    #[command(flatten)]
    pub thread_overrides: ThreadOverrides,

    /// Tail every file created in this directory
    #[arg(long, env = "PRODUCER_WATCH_DIRECTORY")]
    pub producer_watch_directory: Option<PathBuf>,

    /// Ingest this file once
    #[arg(long, env = "PRODUCER_FROM_FILE")]
    pub producer_from_file: Option<PathBuf>,

    /// Source address for outbound probes
    #[arg(long, env = "LOCAL_ADDRESS")]
    pub local_address: Option<IpAddr>,

    /// One CIDR per line; listed targets are never probed
    #[arg(long, env = "BLOCKLIST_FILE_PATH", default_value = doe_scan::blocklist::DEFAULT_PATH)]
    pub blocklist_file_path: PathBuf,

    /// Kafka consumer group
    #[arg(long, env = "CONSUMER_GROUP", default_value = "doe-scanner")]
    pub consumer_group: String,

    /// JSON-lines result file
    #[arg(long, env = "STORAGE_PATH", default_value = "results.jsonl")]
    pub storage_path: PathBuf,

    /// Seconds a run stays in the deduplication cache after its last scan
    #[arg(long, env = "SCAN_CACHE_TIME", default_value_t = 7200)]
    pub scan_cache_time: u64,

    /// Seconds a watched file may stay idle before its tail exits
    #[arg(long, env = "WAIT_UNTIL_EXIT", default_value_t = 3600)]
    pub wait_until_exit: u64,

    /// Recursive resolver for PTR lookups and EDSR seeds
    #[arg(long, env = "DEFAULT_RECURSIVE_RESOLVER", default_value = doe_scan::handler::DEFAULT_RECURSIVE_RESOLVER)]
    pub default_recursive_resolver: String,

    /// Milliseconds a consumer blocks on one broker read
    #[arg(long, env = "BROKER_READ_TIMEOUT", default_value_t = 1000)]
    pub broker_read_timeout: u64,

    /// Protocols chased by EDSR scans
    #[arg(long, env = "EDSR_PROTOCOLS", value_delimiter = ',', default_value = "h2,dot,doq")]
    pub edsr_protocols: Vec<String>,

    /// Scans published per second by the ingesters, 0 for unlimited
    #[arg(long, env = "PRODUCER_RATE_LIMIT", default_value_t = 0)]
    pub producer_rate_limit: u32,

    /// Name looked up by DoH, DoT and DoQ scans
    #[arg(long, env = "DOE_QUERY_NAME", default_value = doe_scan::handler::DEFAULT_DOE_QUERY_NAME)]
    pub doe_query_name: String,
}

/// Per-type worker counts overriding THREADS
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ThreadOverrides {
    /// Workers for DDR scans
    #[arg(long, env = "THREADS_DDR")]
    pub threads_ddr: Option<usize>,
    /// Workers for EDSR scans
    #[arg(long, env = "THREADS_EDSR")]
    pub threads_edsr: Option<usize>,
    /// Workers for DoH scans
    #[arg(long, env = "THREADS_DOH")]
    pub threads_doh: Option<usize>,
    /// Workers for DoT scans
    #[arg(long, env = "THREADS_DOT")]
    pub threads_dot: Option<usize>,
    /// Workers for DoQ scans
    #[arg(long, env = "THREADS_DOQ")]
    pub threads_doq: Option<usize>,
    /// Workers for certificate scans
    #[arg(long, env = "THREADS_CERTIFICATE")]
    pub threads_certificate: Option<usize>,
    /// Workers for PTR scans
    #[arg(long, env = "THREADS_PTR")]
    pub threads_ptr: Option<usize>,
    /// Workers for RESINFO scans
    #[arg(long, env = "THREADS_RESINFO")]
    pub threads_resinfo: Option<usize>,
    /// Workers for canary scans
    #[arg(long, env = "THREADS_CANARY")]
    pub threads_canary: Option<usize>,
    /// Workers for fingerprint scans
    #[arg(long, env = "THREADS_FINGERPRINT")]
    pub threads_fingerprint: Option<usize>,
    /// Workers for DDR-DNSSEC scans
    #[arg(long, env = "THREADS_DDR_DNSSEC")]
    pub threads_ddr_dnssec: Option<usize>,
}

impl ThreadOverrides {
    const fn get(&self, scan_type: ScanType) -> Option<usize> {
        match scan_type {
            ScanType::Ddr => self.threads_ddr,
            ScanType::Edsr => self.threads_edsr,
            ScanType::Doh => self.threads_doh,
            ScanType::Dot => self.threads_dot,
            ScanType::Doq => self.threads_doq,
            ScanType::Certificate => self.threads_certificate,
            ScanType::Ptr => self.threads_ptr,
            ScanType::Resinfo => self.threads_resinfo,
            ScanType::Canary => self.threads_canary,
            ScanType::Fingerprint => self.threads_fingerprint,
            ScanType::DdrDnssec => self.threads_ddr_dnssec,
        }
    }
}

/// Process role
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Execute scans read from the broker
    Consumer,
    /// Ingest targets and publish root scans
    Producer,
    /// Ingester and consumers in one process over an in-memory broker
    Standalone,
}

/// Scan type selection
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ddr,
    Doh,
    Doq,
    Dot,
    Certificate,
    Ptr,
    Edsr,
    Fingerprint,
    DdrDnssec,
    Canary,
    Resinfo,
    /// Every scan type
    All,
}

impl Protocol {
    /// Scan types selected
    #[must_use]
    pub fn scan_types(self) -> Vec<ScanType> {
        let one = match self {
            Self::All => return ScanType::ALL.to_vec(),
            Self::Ddr => ScanType::Ddr,
            Self::Doh => ScanType::Doh,
            Self::Doq => ScanType::Doq,
            Self::Dot => ScanType::Dot,
            Self::Certificate => ScanType::Certificate,
            Self::Ptr => ScanType::Ptr,
            Self::Edsr => ScanType::Edsr,
            Self::Fingerprint => ScanType::Fingerprint,
            Self::DdrDnssec => ScanType::DdrDnssec,
            Self::Canary => ScanType::Canary,
            Self::Resinfo => ScanType::Resinfo,
        };
        vec![one]
    }
}

impl Config {
    /// Workers for `scan_type`: its override, else THREADS, at least one
    #[must_use]
    pub fn threads_for(&self, scan_type: ScanType) -> usize {
        self.thread_overrides
            .get(scan_type)
            .unwrap_or(self.threads)
            .max(1)
    }

    /// Settings for the probe engines
    #[must_use]
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::new().local_address(self.local_address)
    }

    /// Settings for the root scan factories
    #[must_use]
    pub fn factory_settings(&self) -> FactorySettings {
        FactorySettings {
            default_resolver: self.default_recursive_resolver.clone(),
            edsr_protocols: self.edsr_protocols.clone(),
        }
    }

    #[must_use]
    pub const fn scan_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_cache_time)
    }

    #[must_use]
    pub const fn wait_until_exit(&self) -> Duration {
        Duration::from_secs(self.wait_until_exit)
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_read_timeout)
    }
}
