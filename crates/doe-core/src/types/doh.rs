//! DNS over HTTPS.

use crate::types::metadata::ScanMetadata;
use crate::types::tls::{Endpoint, TlsInfo};
use crate::types::{message, millis};
use hickory_proto::op::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default DoH port
pub const DEFAULT_PORT: u16 = 443;
/// URI template used when the resolver advertises none
pub const DEFAULT_URI_TEMPLATE: &str = "/dns-query{?dns}";
/// Media type of DNS wire messages
pub const DNS_MESSAGE_MEDIA_TYPE: &str = "application/dns-message";

/// HTTP method for the DoH request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Query in the `dns` URL parameter
    #[default]
    Get,
    /// Query in the request body
    Post,
}

/// HTTP version used to carry the exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpVersion {
    /// HTTP/1.1
    H1,
    /// HTTP/2
    #[default]
    H2,
    /// HTTP/3 over QUIC
    H3,
}

impl HttpVersion {
    /// Map an ALPN identifier to a version
    #[must_use]
    pub fn from_alpn(alpn: &str) -> Option<Self> {
        match alpn.to_ascii_lowercase().as_str() {
            "h1" | "http/1.1" => Some(Self::H1),
            "h2" => Some(Self::H2),
            "h3" => Some(Self::H3),
            _ => None,
        }
    }

    /// ALPN identifier offered in the handshake
    #[must_use]
    pub const fn alpn(self) -> &'static str {
        match self {
            Self::H1 => "http/1.1",
            Self::H2 => "h2",
            Self::H3 => "h3",
        }
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H1 => write!(f, "h1"),
            Self::H2 => write!(f, "h2"),
            Self::H3 => write!(f, "h3"),
        }
    }
}

/// A DoH query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DohQuery {
    /// Connection parameters
    #[serde(flatten)]
    pub endpoint: Endpoint,

    /// RFC 8484 URI template, e.g. `/dns-query{?dns}`
    pub uri_template: String,

    /// Preferred method
    #[serde(default)]
    pub method: HttpMethod,

    /// Fall back to POST when a GET URL would be too long
    #[serde(default = "default_true")]
    pub post_fallback: bool,

    /// HTTP version
    #[serde(default)]
    pub http_version: HttpVersion,

    /// DNS message to send
    #[serde(with = "message")]
    pub message: Message,
}

const fn default_true() -> bool {
    true
}

impl DohQuery {
    /// GET query over HTTP/2 on the default path
    #[must_use]
    pub fn new(endpoint: Endpoint, message: Message) -> Self {
        Self {
            endpoint,
            uri_template: DEFAULT_URI_TEMPLATE.to_string(),
            method: HttpMethod::Get,
            post_fallback: true,
            http_version: HttpVersion::H2,
            message,
        }
    }

    /// Use this URI template
    #[must_use]
    pub fn with_uri_template(mut self, template: impl Into<String>) -> Self {
        self.uri_template = template.into();
        self
    }

    /// Use this HTTP version
    #[must_use]
    pub const fn with_http_version(mut self, version: HttpVersion) -> Self {
        self.http_version = version;
        self
    }

    /// Use this method
    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }
}

/// A DoH response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DohResponse {
    /// Response message
    #[serde(with = "message")]
    pub message: Message,

    /// Round-trip time of the HTTP exchange
    #[serde(with = "millis::fractional")]
    pub rtt: Duration,

    /// HTTP status code
    pub status: u16,

    /// Method that was actually used
    pub method: HttpMethod,

    /// HTTP version that carried the exchange
    pub http_version: HttpVersion,

    /// Request URL
    pub url: String,

    /// Session properties
    pub tls: TlsInfo,
}

/// DoH scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DohScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: DohQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DohResponse>,
}

impl DohScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: DohQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
        }
    }
}
