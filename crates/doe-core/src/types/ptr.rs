//! Reverse (PTR) lookups.
//!
//! Reverse names follow the usual pattern: the address is written backwards
//! under a fixed zone. Checking 8.8.8.8 queries `8.8.8.8.in-addr.arpa.`,
//! IPv6 addresses are expanded to 32 nibbles under `ip6.arpa.`.

use crate::error::Result;
use crate::types::dns::{build_query, DnsQuery, DnsResponse};
use crate::types::metadata::ScanMetadata;
use hickory_proto::rr::{RData, RecordType};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Reverse zone for IPv4
pub const IPV4_ZONE: &str = "in-addr.arpa.";
/// Reverse zone for IPv6
pub const IPV6_ZONE: &str = "ip6.arpa.";

/// Reverse the octets of an IPv4 address
#[must_use]
pub fn reverse_ipv4(ip: &Ipv4Addr) -> String {
    let octets = ip.octets();
    format!("{}.{}.{}.{}", octets[3], octets[2], octets[1], octets[0])
}

/// Reverse the nibbles of an IPv6 address
#[must_use]
pub fn reverse_ipv6(ip: &Ipv6Addr) -> String {
    let mut out = String::with_capacity(63);
    for byte in ip.octets().iter().rev() {
        if !out.is_empty() {
            out.push('.');
        }
        let _ = write!(out, "{:x}.{:x}", byte & 0x0F, byte >> 4);
    }
    out
}

/// Fully qualified reverse name of an address
///
/// Example: `reverse_name(8.8.8.8)` -> `"8.8.8.8.in-addr.arpa."`
#[must_use]
pub fn reverse_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}.{IPV4_ZONE}", reverse_ipv4(&v4)),
        IpAddr::V6(v6) => format!("{}.{IPV6_ZONE}", reverse_ipv6(&v6)),
    }
}

/// A PTR query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtrQuery {
    /// Address being looked up
    pub address: IpAddr,

    /// PTR query sent to the recursive resolver
    pub dns: DnsQuery,
}

impl PtrQuery {
    /// Look up `address` through `resolver:port`
    pub fn new(address: IpAddr, resolver: impl Into<String>, port: u16) -> Result<Self> {
        let message = build_query(&reverse_name(address), RecordType::PTR, false)?;
        Ok(Self {
            address,
            dns: DnsQuery::new(resolver, port, message),
        })
    }
}

/// A PTR result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtrResult {
    /// Raw DNS exchange
    pub response: DnsResponse,

    /// Names from PTR answers
    #[serde(default)]
    pub hostnames: Vec<String>,
}

impl PtrResult {
    /// Collect PTR targets from the answers
    #[must_use]
    pub fn from_response(response: DnsResponse) -> Self {
        let hostnames = response
            .message
            .answers()
            .iter()
            .filter_map(|r| match r.data() {
                RData::PTR(ptr) => Some(ptr.0.to_string()),
                _ => None,
            })
            .collect();
        Self { response, hostnames }
    }
}

/// PTR scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtrScan {
    /// Lineage, timestamps, errors
    pub meta: ScanMetadata,
    /// Query to execute
    pub query: PtrQuery,
    /// Filled on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PtrResult>,
}

impl PtrScan {
    /// Envelope for `query` under `meta`
    #[must_use]
    pub const fn new(meta: ScanMetadata, query: PtrQuery) -> Self {
        Self {
            meta,
            query,
            result: None,
        }
    }
}
