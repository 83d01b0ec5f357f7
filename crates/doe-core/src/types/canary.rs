//! Canary domain probing.

use crate::types::dns::DnsResponse;
use crate::types::metadata::ScanMetadata;
use hickory_proto::op::ResponseCode;
use serde::{Deserialize, Serialize};

/// Mozilla's DoH canary
pub const USE_APPLICATION_DNS: &str = "use-application-dns.net.";
/// iCloud Private Relay canaries
pub const ICLOUD_PRIVATE_RELAY: [&str; 2] = ["mask.icloud.com.", "mask-h2.icloud.com."];

/// Canary domains probed by default
#[must_use]
pub fn default_domains() -> Vec<String> {
    std::iter::once(USE_APPLICATION_DNS)
        .chain(ICLOUD_PRIVATE_RELAY)
        .map(str::to_string)
        .collect()
}

/// A canary query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryQuery {
    /// Resolver address
    pub host: String,
    /// Resolver port
    pub port: u16,
    /// Domains to query for A records
    pub domains: Vec<String>,
}

impl CanaryQuery {
    /// Probe the default canaries at `host:port`
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            domains: default_domains(),
        }
    }
}

/// Outcome for one canary domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryDomainResult {
    /// Canary domain
    pub domain: String,

    /// Raw DNS exchange, if a response arrived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<DnsResponse>,

    /// Response code name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<String>,

    /// Number of answer records
    #[serde(default)]
    pub answer_count: usize,

    /// The resolver signals the canary (NXDOMAIN or no address)
    #[serde(default)]
    pub blocked: bool,
}

impl CanaryDomainResult {
    /// Classify a response for `domain`
    #[must_use]
    pub fn from_response(domain: impl Into<String>, response: DnsResponse) -> Self {
        let code = response.message.response_code();
        let answer_count = response.message.answers().len();
        let blocked = code == ResponseCode::NXDomain || response.answer_addresses().is_empty();
        Self {
            domain: domain.into(),
            response_code: Some(code.to_string()),
            answer_count,
            blocked,
            response: Some(response),
        }
    }

    /// No response arrived for `domain`
    #[must_use]
    pub fn no_response(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            response: None,
            response_code: None,
            answer_count: 0,
            blocked: false,
        }
    }
}

/// A canary result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanaryResult {
    /// One entry per queried domain, in query order
    pub domains: Vec<CanaryDomainResult>,
}

/// Canary scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: CanaryQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CanaryResult>,
}

impl CanaryScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: CanaryQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{a_rdata, ResponseBuilder};
    use crate::types::dns::TransportProtocol;
    use hickory_proto::rr::RecordType;
    use std::time::Duration;

    fn response(builder: &ResponseBuilder) -> DnsResponse {
        DnsResponse {
            message: builder.build(),
            rtt: Duration::from_millis(3),
            protocol: TransportProtocol::Udp,
            udp_attempts: 1,
            tcp_attempts: 0,
        }
    }

    #[test]
    fn test_default_domains() {
        let domains = default_domains();
        assert_eq!(domains.len(), 3);
        assert_eq!(domains[0], USE_APPLICATION_DNS);
    }

    #[test]
    fn test_nxdomain_is_blocked() {
        let builder = ResponseBuilder::new(USE_APPLICATION_DNS, RecordType::A).rcode(3);
        let result = CanaryDomainResult::from_response(USE_APPLICATION_DNS, response(&builder));
        assert!(result.blocked);
        assert_eq!(result.answer_count, 0);
    }

    #[test]
    fn test_address_answer_is_not_blocked() {
        let builder = ResponseBuilder::new("mask.icloud.com.", RecordType::A).answer(
            "mask.icloud.com.",
            60,
            a_rdata("17.0.0.1".parse().unwrap()),
        );
        let result = CanaryDomainResult::from_response("mask.icloud.com.", response(&builder));
        assert!(!result.blocked);
        assert_eq!(result.answer_count, 1);
    }
}
