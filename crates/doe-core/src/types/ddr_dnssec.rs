//! DDR with the DNSSEC-OK bit set.

use crate::error::Result;
use crate::types::ddr::DDR_NAME;
use crate::types::dns::{build_query, DnsQuery, DnsResponse};
use crate::types::metadata::ScanMetadata;
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use serde::{Deserialize, Serialize};

/// Record type number of RRSIG
pub const TYPE_RRSIG: u16 = 46;

/// A DDR-DNSSEC query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdrDnssecQuery {
    /// SVCB query for `_dns.resolver.arpa.` with DO set
    pub dns: DnsQuery,
}

impl DdrDnssecQuery {
    /// DDR-DNSSEC query against `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let message = build_query(DDR_NAME, RecordType::SVCB, true)?;
        Ok(Self {
            dns: DnsQuery::new(host, port, message),
        })
    }
}

/// A DDR-DNSSEC result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdrDnssecResult {
    /// Raw DNS exchange
    pub response: DnsResponse,
    /// Number of SVCB answers
    pub svcb_count: usize,
    /// RRSIG records accompany the answer
    pub rrsig_present: bool,
    /// AD flag of the response
    pub authentic_data: bool,
}

impl DdrDnssecResult {
    /// Summarize a response
    #[must_use]
    pub fn from_response(response: DnsResponse) -> Self {
        let (svcb_count, rrsig_present, authentic_data) = summarize(&response.message);
        Self {
            response,
            svcb_count,
            rrsig_present,
            authentic_data,
        }
    }
}

fn summarize(message: &Message) -> (usize, bool, bool) {
    let svcb = message
        .answers()
        .iter()
        .filter(|r| r.record_type() == RecordType::SVCB)
        .count();
    let rrsig = message
        .answers()
        .iter()
        .any(|r| u16::from(r.record_type()) == TYPE_RRSIG);
    (svcb, rrsig, message.authentic_data())
}

/// DDR-DNSSEC scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdrDnssecScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: DdrDnssecQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DdrDnssecResult>,
}

impl DdrDnssecScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: DdrDnssecQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
        }
    }
}
