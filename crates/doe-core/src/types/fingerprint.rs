//! Resolver software fingerprinting.

use crate::types::dns::DnsResponse;
use crate::types::metadata::ScanMetadata;
use crate::types::ssh::{SshQuery, SshResponse};
use hickory_proto::rr::RData;
use serde::{Deserialize, Serialize};

/// CHAOS names that commonly reveal the server version
pub const VERSION_NAMES: [&str; 2] = ["version.bind.", "version.server."];

/// A fingerprint query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintQuery {
    /// Resolver address
    pub host: String,
    /// Resolver port
    pub port: u16,
    /// SSH probe of the same host
    pub ssh: SshQuery,
}

impl FingerprintQuery {
    /// Fingerprint `host`, DNS on `port`, SSH on 22
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            ssh: SshQuery::new(host.clone()),
            host,
            port,
        }
    }
}

/// Answer to a CHAOS TXT version query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionAnswer {
    /// Name queried
    pub name: String,
    /// Raw DNS exchange
    pub response: DnsResponse,
    /// TXT strings from the answer
    #[serde(default)]
    pub txt: Vec<String>,
}

impl VersionAnswer {
    /// Collect TXT strings from a response
    #[must_use]
    pub fn from_response(name: impl Into<String>, response: DnsResponse) -> Self {
        let txt = response
            .message
            .answers()
            .iter()
            .filter_map(|r| match r.data() {
                RData::TXT(txt) => Some(
                    txt.iter()
                        .map(|s| String::from_utf8_lossy(s).into_owned())
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .flatten()
            .collect();
        Self {
            name: name.into(),
            response,
            txt,
        }
    }
}

/// A fingerprint result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintResult {
    /// Version answers that arrived
    #[serde(default)]
    pub versions: Vec<VersionAnswer>,
    /// SSH probe outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshResponse>,
}

/// Fingerprint scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: FingerprintQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<FingerprintResult>,
}

impl FingerprintScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: FingerprintQuery) -> Self {
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
    use crate::testing::{txt_rdata, ResponseBuilder};
    use crate::types::dns::TransportProtocol;
    use crate::wire::CLASS_CH;
    use hickory_proto::rr::RecordType;
    use std::time::Duration;

    #[test]
    fn test_version_txt() {
        let message = ResponseBuilder::new("version.bind.", RecordType::TXT)
            .class(CLASS_CH)
            .answer("version.bind.", 0, txt_rdata(&["unbound 1.19.0"]))
            .build();
        let response = DnsResponse {
            message,
            rtt: Duration::from_millis(2),
            protocol: TransportProtocol::Udp,
            udp_attempts: 1,
            tcp_attempts: 0,
        };
        let answer = VersionAnswer::from_response("version.bind.", response);
        assert_eq!(answer.txt, vec!["unbound 1.19.0"]);
    }

    #[test]
    fn test_query_targets_same_host() {
        let query = FingerprintQuery::new("192.0.2.53", 53);
        assert_eq!(query.ssh.host, "192.0.2.53");
        assert_eq!(query.ssh.port, 22);
    }
}
