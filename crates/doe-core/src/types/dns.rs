//! Classical DNS query and response shapes.

use crate::error::{CoreError, Result};
use crate::types::{message, millis};
use crate::wire;
use hickory_proto::op::Message;
use hickory_proto::rr::{RData, Record, RecordType};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default number of UDP attempts
pub const DEFAULT_MAX_UDP_RETRIES: u32 = 3;
/// Default number of TCP attempts
pub const DEFAULT_MAX_TCP_RETRIES: u32 = 1;
/// Default per-attempt UDP timeout
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(2);
/// Default per-attempt TCP timeout
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(5);
/// Default upper bound for the exponential backoff between attempts
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(4);

/// Transport used for a classical DNS exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// UDP with optional TCP fallback
    #[default]
    Udp,
    /// TCP only
    Tcp,
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// A classical DNS query with its retry and fallback budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsQuery {
    /// Server hostname or address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Message to send
    #[serde(with = "message")]
    pub message: Message,

    /// Initial transport
    #[serde(default)]
    pub protocol: TransportProtocol,

    /// Maximum UDP attempts
    pub max_udp_retries: u32,

    /// Maximum TCP attempts
    pub max_tcp_retries: u32,

    /// Per-attempt UDP timeout (zero disables the timeout)
    #[serde(with = "millis")]
    pub udp_timeout: Duration,

    /// Per-attempt TCP timeout (zero disables the timeout)
    #[serde(with = "millis")]
    pub tcp_timeout: Duration,

    /// Umbrella timeout overriding both per-transport timeouts
    #[serde(default, with = "millis::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Retry over TCP when UDP fails or is truncated
    pub auto_fallback_tcp: bool,

    /// Cap for the exponential backoff between attempts
    #[serde(with = "millis")]
    pub max_backoff_time: Duration,
}

impl DnsQuery {
    /// Create a query with default retry settings
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, message: Message) -> Self {
        Self {
            host: host.into(),
            port,
            message,
            protocol: TransportProtocol::Udp,
            max_udp_retries: DEFAULT_MAX_UDP_RETRIES,
            max_tcp_retries: DEFAULT_MAX_TCP_RETRIES,
            udp_timeout: DEFAULT_UDP_TIMEOUT,
            tcp_timeout: DEFAULT_TCP_TIMEOUT,
            timeout: None,
            auto_fallback_tcp: true,
            max_backoff_time: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Set the umbrella timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Effective timeout for the given transport
    #[must_use]
    pub fn timeout_for(&self, protocol: TransportProtocol) -> Duration {
        self.timeout.unwrap_or(match protocol {
            TransportProtocol::Udp => self.udp_timeout,
            TransportProtocol::Tcp => self.tcp_timeout,
        })
    }

    /// Name of the first question, if any
    #[must_use]
    pub fn question_name(&self) -> Option<String> {
        self.message.queries().first().map(|q| q.name().to_string())
    }
}

/// Response of a classical DNS exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsResponse {
    /// Response message
    #[serde(with = "message")]
    pub message: Message,

    /// Round-trip time of the successful exchange
    #[serde(with = "millis::fractional")]
    pub rtt: Duration,

    /// Transport that produced the response
    pub protocol: TransportProtocol,

    /// UDP attempts made
    pub udp_attempts: u32,

    /// TCP attempts made
    pub tcp_attempts: u32,
}

impl DnsResponse {
    /// Answer records of the given type
    pub fn answers_of(&self, rtype: RecordType) -> impl Iterator<Item = &Record> {
        self.message
            .answers()
            .iter()
            .filter(move |r| r.record_type() == rtype)
    }

    /// Addresses found in A/AAAA answers
    #[must_use]
    pub fn answer_addresses(&self) -> Vec<IpAddr> {
        record_addresses(self.message.answers())
    }
}

/// Extract the addresses carried by A and AAAA records
#[must_use]
pub fn record_addresses(records: &[Record]) -> Vec<IpAddr> {
    records
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect()
}

/// Build a recursive query message for `name`/`rtype` in class IN.
///
/// When `dnssec_ok` is set an EDNS0 OPT record with the DO bit is attached.
pub fn build_query(name: &str, rtype: RecordType, dnssec_ok: bool) -> Result<Message> {
    build_query_in_class(name, u16::from(rtype), wire::CLASS_IN, dnssec_ok)
}

/// Build a query with an explicit numeric type and class
pub fn build_query_in_class(name: &str, rtype: u16, class: u16, dnssec_ok: bool) -> Result<Message> {
    let fqdn = to_fqdn(name);
    let bytes = wire::encode_query(rand::random(), &fqdn, rtype, class, dnssec_ok)?;
    Message::from_vec(&bytes).map_err(CoreError::from)
}

/// Append the root label if it is missing
#[must_use]
pub fn to_fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Strip the trailing root label (for SNI and URLs)
#[must_use]
pub fn without_root(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// Compare two DNS names case-insensitively, ignoring the trailing dot
#[must_use]
pub fn names_equal(a: &str, b: &str) -> bool {
    without_root(a).eq_ignore_ascii_case(without_root(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query() {
        let message = build_query("_dns.resolver.arpa", RecordType::SVCB, false).unwrap();
        assert_eq!(message.queries().len(), 1);
        assert_eq!(message.queries()[0].query_type(), RecordType::SVCB);
        assert_eq!(message.queries()[0].name().to_string(), "_dns.resolver.arpa.");
        assert!(message.recursion_desired());
        assert!(message.extensions().is_none());
    }

    #[test]
    fn test_build_query_dnssec() {
        let message = build_query("example.com.", RecordType::A, true).unwrap();
        let edns = message.extensions().as_ref().unwrap();
        assert_eq!(edns.max_payload(), wire::EDNS_PAYLOAD);
    }

    #[test]
    fn test_timeout_for() {
        let message = build_query("example.com.", RecordType::A, false).unwrap();
        let query = DnsQuery::new("8.8.8.8", 53, message);
        assert_eq!(query.timeout_for(TransportProtocol::Udp), DEFAULT_UDP_TIMEOUT);
        assert_eq!(query.timeout_for(TransportProtocol::Tcp), DEFAULT_TCP_TIMEOUT);

        let query = query.with_timeout(Duration::from_millis(700));
        assert_eq!(query.timeout_for(TransportProtocol::Udp), Duration::from_millis(700));
        assert_eq!(query.timeout_for(TransportProtocol::Tcp), Duration::from_millis(700));
    }

    #[test]
    fn test_names_equal() {
        assert!(names_equal("dns.google.", "DNS.google"));
        assert!(!names_equal("dns.google.", "dns.google.com."));
        assert_eq!(to_fqdn("a.b"), "a.b.");
        assert_eq!(without_root("a.b."), "a.b");
    }

    #[test]
    fn test_query_json_roundtrip() {
        let message = build_query("example.com.", RecordType::AAAA, false).unwrap();
        let query = DnsQuery::new("1.1.1.1", 53, message).with_timeout(Duration::from_secs(3));
        let json = serde_json::to_string(&query).unwrap();
        let parsed: DnsQuery = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.host, "1.1.1.1");
        assert_eq!(parsed.timeout, Some(Duration::from_secs(3)));
        assert_eq!(parsed.message.to_vec().unwrap(), query.message.to_vec().unwrap());
    }
}
