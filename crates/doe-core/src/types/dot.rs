//! DNS over TLS.

use crate::types::metadata::ScanMetadata;
use crate::types::tls::{Endpoint, TlsInfo};
use crate::types::{message, millis};
use hickory_proto::op::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default DoT port
pub const DEFAULT_PORT: u16 = 853;

/// A DoT query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotQuery {
    /// Connection parameters
    #[serde(flatten)]
    pub endpoint: Endpoint,

    /// DNS message to send
    #[serde(with = "message")]
    pub message: Message,
}

impl DotQuery {
    /// Query `message` at `endpoint`
    #[must_use]
    pub const fn new(endpoint: Endpoint, message: Message) -> Self {
        Self { endpoint, message }
    }
}

/// A DoT response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotResponse {
    /// Response message
    #[serde(with = "message")]
    pub message: Message,

    /// Time from sending the query to reading the response
    #[serde(with = "millis::fractional")]
    pub rtt: Duration,

    /// Session properties
    pub tls: TlsInfo,
}

/// DoT scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: DotQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DotResponse>,
}

impl DotScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: DotQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
        }
    }
}
