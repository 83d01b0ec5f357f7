//! DNS over QUIC (RFC 9250).

use crate::types::metadata::ScanMetadata;
use crate::types::tls::{Endpoint, TlsInfo};
use crate::types::{message, millis};
use hickory_proto::op::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default DoQ port
pub const DEFAULT_PORT: u16 = 853;
/// ALPN identifiers offered in the handshake, final version first
pub const ALPN: [&str; 2] = ["doq", "dq"];

/// A DoQ query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoqQuery {
    /// Connection parameters
    #[serde(flatten)]
    pub endpoint: Endpoint,

    /// DNS message to send; its ID is zeroed on the wire
    #[serde(with = "message")]
    pub message: Message,
}

impl DoqQuery {
    /// Query `message` at `endpoint`
    #[must_use]
    pub const fn new(endpoint: Endpoint, message: Message) -> Self {
        Self { endpoint, message }
    }
}

/// A DoQ response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoqResponse {
    /// Response message
    #[serde(with = "message")]
    pub message: Message,

    /// Time from opening the stream to reading the response
    #[serde(with = "millis::fractional")]
    pub rtt: Duration,

    /// Session properties
    pub tls: TlsInfo,
}

/// DoQ scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoqScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: DoqQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DoqResponse>,
}

impl DoqScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: DoqQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
        }
    }
}
