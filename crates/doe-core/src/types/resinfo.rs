//! Resolver information (RFC 9606).

use crate::error::Result;
use crate::types::dns::{build_query_in_class, DnsQuery, DnsResponse};
use crate::types::metadata::ScanMetadata;
use crate::wire;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use serde::{Deserialize, Serialize};

/// Record type number of RESINFO
pub const TYPE_RESINFO: u16 = 261;

/// A RESINFO query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResinfoQuery {
    /// Name queried for RESINFO, usually the designated resolver name
    pub target_name: String,

    /// RESINFO query sent to the resolver
    pub dns: DnsQuery,
}

impl ResinfoQuery {
    /// Ask `host:port` for the RESINFO of `target_name`
    pub fn new(host: impl Into<String>, port: u16, target_name: impl Into<String>) -> Result<Self> {
        let target_name = target_name.into();
        let message = build_query_in_class(&target_name, TYPE_RESINFO, wire::CLASS_IN, false)?;
        Ok(Self {
            target_name,
            dns: DnsQuery::new(host, port, message),
        })
    }
}

/// A RESINFO result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResinfoResult {
    /// Raw DNS exchange
    pub response: DnsResponse,

    /// Key/value strings from all RESINFO records
    #[serde(default)]
    pub keys: Vec<String>,

    /// More than one RESINFO record was returned
    #[serde(default)]
    pub multiple_records: bool,

    /// At least one RESINFO record was returned
    #[serde(default)]
    pub rfc9606_support: bool,
}

impl ResinfoResult {
    /// Extract RESINFO keys from the answers
    pub fn from_response(response: DnsResponse) -> Result<Self> {
        let (keys, records) = extract_keys(&response.message)?;
        Ok(Self {
            response,
            keys,
            multiple_records: records > 1,
            rfc9606_support: records > 0,
        })
    }
}

/// Keys of every RESINFO answer and the number of RESINFO answers
fn extract_keys(message: &Message) -> Result<(Vec<String>, usize)> {
    let mut keys = Vec::new();
    let mut records = 0;
    for record in message
        .answers()
        .iter()
        .filter(|r| u16::from(r.record_type()) == TYPE_RESINFO)
    {
        records += 1;
        let rdata = record.data().to_bytes()?;
        for key in wire::decode_character_strings(&rdata)? {
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
    }
    Ok((keys, records))
}

/// RESINFO scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResinfoScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: ResinfoQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResinfoResult>,
}

impl ResinfoScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: ResinfoQuery) -> Self {
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
    use crate::testing::{a_rdata, resinfo_rdata, ResponseBuilder};

    #[test]
    fn test_single_record() {
        let message = ResponseBuilder::with_type("dns.example.", TYPE_RESINFO)
            .answer("dns.example.", 300, resinfo_rdata(&["qnamemin", "exterr=15-17"]))
            .build();
        let (keys, records) = extract_keys(&message).unwrap();
        assert_eq!(keys, vec!["qnamemin", "exterr=15-17"]);
        assert_eq!(records, 1);
    }

    #[test]
    fn test_multiple_records() {
        let message = ResponseBuilder::with_type("dns.example.", TYPE_RESINFO)
            .answer("dns.example.", 300, resinfo_rdata(&["qnamemin"]))
            .answer("dns.example.", 300, resinfo_rdata(&["infourl=https://a.example/"]))
            .build();
        let (keys, records) = extract_keys(&message).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(records, 2);
    }

    #[test]
    fn test_no_resinfo() {
        let message = ResponseBuilder::with_type("dns.example.", TYPE_RESINFO)
            .answer("dns.example.", 300, a_rdata("192.0.2.1".parse().unwrap()))
            .build();
        let (keys, records) = extract_keys(&message).unwrap();
        assert!(keys.is_empty());
        assert_eq!(records, 0);
    }

    #[test]
    fn test_query_type() {
        let query = ResinfoQuery::new("9.9.9.9", 53, "dns.quad9.net.").unwrap();
        assert_eq!(u16::from(query.dns.message.queries()[0].query_type()), TYPE_RESINFO);
    }
}
