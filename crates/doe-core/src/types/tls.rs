//! Shared shapes for TLS and QUIC based probes.

use crate::types::dns::without_root;
use crate::types::millis;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default timeout for encrypted probes
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how an encrypted probe connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server name (the SVCB target, possibly with trailing dot) or address
    pub host: String,

    /// Address to dial instead of resolving `host`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,

    /// Server port
    pub port: u16,

    /// Server name indication override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,

    /// Accept certificates that fail verification
    #[serde(default)]
    pub skip_certificate_verify: bool,

    /// Operation timeout (zero disables the timeout)
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl Endpoint {
    /// Endpoint with default timeout and verification on
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            ip: None,
            port,
            sni: None,
            skip_certificate_verify: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Dial this address
    #[must_use]
    pub const fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Override the server name indication
    #[must_use]
    pub fn with_sni(mut self, sni: impl Into<String>) -> Self {
        self.sni = Some(sni.into());
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name presented in the TLS handshake
    #[must_use]
    pub fn server_name(&self) -> &str {
        without_root(self.sni.as_deref().unwrap_or(&self.host))
    }

    /// Host component used in URLs
    #[must_use]
    pub fn url_host(&self) -> &str {
        without_root(&self.host)
    }
}

/// Properties of an established TLS session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsInfo {
    /// Negotiated protocol version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Negotiated cipher suite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<String>,

    /// Negotiated ALPN protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,

    /// Whether the chain verified against the web PKI roots
    pub certificate_valid: bool,

    /// Verification failure, when the chain did not verify
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_error: Option<String>,

    /// DER certificates presented by the peer, base64 encoded
    #[serde(default)]
    pub peer_certificates: Vec<String>,
}
