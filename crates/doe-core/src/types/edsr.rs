//! Encrypted DNS Server Redirection.

use crate::error::ScanError;
use crate::svcb::SvcbRecord;
use crate::types::dns::{DnsQuery, DnsResponse};
use crate::types::metadata::ScanMetadata;
use crate::types::millis;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default timeout for each hop query
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// An EDSR query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdsrQuery {
    /// Designated resolver name (or address) to chase
    pub target_name: String,

    /// ALPN identifier of the sought protocol, e.g. `h2`, `dot`, `doq`
    pub protocol: String,

    /// Recursive resolver used to resolve `target_name`
    pub resolver: String,

    /// Per-query timeout
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl EdsrQuery {
    /// Chase `target_name` for `protocol` using `resolver` for the seed lookup
    #[must_use]
    pub fn new(
        target_name: impl Into<String>,
        protocol: impl Into<String>,
        resolver: impl Into<String>,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            protocol: protocol.into(),
            resolver: resolver.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// One node in the redirection graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdsrHop {
    /// Hop identifier
    pub id: String,

    /// Hop that discovered this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Depth, zero for the seed
    pub hop: u32,

    /// Query sent at this hop
    pub query: DnsQuery,

    /// Response, if one arrived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<DnsResponse>,

    /// SVCB records matching the target name
    #[serde(default)]
    pub svcb: Vec<SvcbRecord>,

    /// Glue addresses for the target name found at this hop
    #[serde(default)]
    pub glue: Vec<IpAddr>,

    /// Glue addresses already considered by an earlier hop
    #[serde(default)]
    pub intersecting: Vec<IpAddr>,

    /// The hop advertised the sought protocol
    #[serde(default)]
    pub protocol_advertised: bool,

    /// Errors observed at this hop
    #[serde(default)]
    pub errors: Vec<ScanError>,
}

impl EdsrHop {
    /// Hop at `depth` below `parent`
    #[must_use]
    pub fn new(parent_id: Option<String>, hop: u32, query: DnsQuery) -> Self {
        Self {
            id: crate::types::metadata::new_id(),
            parent_id,
            hop,
            query,
            response: None,
            svcb: Vec::new(),
            glue: Vec::new(),
            intersecting: Vec::new(),
            protocol_advertised: false,
            errors: Vec::new(),
        }
    }
}

/// An EDSR result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdsrResult {
    /// Hops in the order they were executed
    pub hops: Vec<EdsrHop>,

    /// At least one hop advertised the protocol via a matching SVCB record
    pub edsr_detected: bool,

    /// Some glue pointed back to an address already visited
    #[serde(rename = "loop")]
    pub loop_detected: bool,
}

/// EDSR scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdsrScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: EdsrQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EdsrResult>,
}

impl EdsrScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: EdsrQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
        }
    }
}
