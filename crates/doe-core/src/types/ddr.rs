//! Discovery of Designated Resolvers (RFC 9462).

use crate::error::Result;
use crate::svcb::SvcbRecord;
use crate::types::dns::{build_query, DnsQuery, DnsResponse};
use crate::types::metadata::ScanMetadata;
use hickory_proto::rr::RecordType;
use serde::{Deserialize, Serialize};

/// Special-use name queried for designated resolvers
pub const DDR_NAME: &str = "_dns.resolver.arpa.";
/// Default port of the unencrypted resolver
pub const DEFAULT_PORT: u16 = 53;

/// A DDR query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdrQuery {
    /// SVCB query for `_dns.resolver.arpa.`
    pub dns: DnsQuery,

    /// Schedule DoH/DoT/DoQ/certificate scans for discovered endpoints
    #[serde(default = "default_true")]
    pub schedule_doe_scans: bool,
}

const fn default_true() -> bool {
    true
}

impl DdrQuery {
    /// DDR query against `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let message = build_query(DDR_NAME, RecordType::SVCB, false)?;
        Ok(Self {
            dns: DnsQuery::new(host, port, message),
            schedule_doe_scans: true,
        })
    }
}

/// A DDR result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdrResult {
    /// Raw DNS exchange
    pub response: DnsResponse,

    /// Decoded SVCB answers that carried no critical error
    #[serde(default)]
    pub svcb: Vec<SvcbRecord>,
}

/// DDR scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdrScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: DdrQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DdrResult>,
    /// A PTR scan was published for the resolver address
    #[serde(default)]
    pub ptr_scheduled: bool,
}

impl DdrScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: DdrQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
            ptr_scheduled: false,
        }
    }
}
