//! Certificate harvesting.

use crate::types::metadata::ScanMetadata;
use crate::types::millis;
use crate::types::tls::{Endpoint, TlsInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default port for certificate scans
pub const DEFAULT_PORT: u16 = 443;

/// A certificate query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateQuery {
    /// Connection parameters
    #[serde(flatten)]
    pub endpoint: Endpoint,

    /// ALPN identifiers to offer
    #[serde(default)]
    pub alpn: Vec<String>,
}

impl CertificateQuery {
    /// Query `endpoint` offering `alpn`
    #[must_use]
    pub const fn new(endpoint: Endpoint, alpn: Vec<String>) -> Self {
        Self { endpoint, alpn }
    }
}

/// Parsed fields of one X.509 certificate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number, hex
    pub serial: String,
    /// Start of validity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    /// End of validity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    /// DNS names from the subject alternative name extension
    #[serde(default)]
    pub dns_names: Vec<String>,
    /// IP addresses from the subject alternative name extension
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    /// Signature algorithm OID
    pub signature_algorithm: String,
    /// Certificate is a CA
    #[serde(default)]
    pub is_ca: bool,
}

/// A certificate response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateResponse {
    /// Session properties, including the raw chain
    pub tls: TlsInfo,

    /// Parsed chain, leaf first
    pub certificates: Vec<CertificateInfo>,

    /// Handshake duration
    #[serde(with = "millis::fractional")]
    pub rtt: Duration,

    /// Verification failed while it was enforced; a relaxed retry applies
    #[serde(default)]
    pub retry_without_certificate_verification: bool,
}

/// Certificate scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: CertificateQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CertificateResponse>,
}

impl CertificateScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: CertificateQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
        }
    }
}
