//! SVCB record decoding.
//!
//! Turns the generic key/value list of an SVCB record into the fields the
//! survey cares about. Unknown keys and undecodable optional values produce
//! non-critical errors; a missing ALPN or target name produces a critical
//! error and the record must not be used to schedule follow-up scans.

use crate::error::{ErrorCause, ScanError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::svcb::{SvcParamValue, SVCB};
use hickory_proto::rr::RData;
use hickory_proto::serialize::binary::BinEncodable;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// SvcParamKey `alpn`
pub const KEY_ALPN: u16 = 1;
/// SvcParamKey `port`
pub const KEY_PORT: u16 = 3;
/// SvcParamKey `ipv4hint`
pub const KEY_IPV4HINT: u16 = 4;
/// SvcParamKey `ech`
pub const KEY_ECH: u16 = 5;
/// SvcParamKey `ipv6hint`
pub const KEY_IPV6HINT: u16 = 6;
/// SvcParamKey `dohpath` (RFC 9461)
pub const KEY_DOHPATH: u16 = 7;
/// Key signalling Oblivious DoH support
pub const KEY_ODOH: u16 = 8;

/// Decoded SVCB record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvcbRecord {
    /// SvcPriority
    pub priority: u16,
    /// TargetName
    pub target: String,
    /// ALPN identifiers
    pub alpn: Vec<String>,
    /// Alternative port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// IPv4 address hints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv4hint: Vec<Ipv4Addr>,
    /// IPv6 address hints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv6hint: Vec<Ipv6Addr>,
    /// Encrypted ClientHello configuration list, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ech: Option<String>,
    /// DoH URI template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dohpath: Option<String>,
    /// Oblivious DoH advertised
    #[serde(default)]
    pub odoh: bool,
}

impl SvcbRecord {
    /// Returns true if the ALPN set contains `protocol`
    #[must_use]
    pub fn supports(&self, protocol: &str) -> bool {
        self.alpn.iter().any(|a| a.eq_ignore_ascii_case(protocol))
    }
}

/// SVCB records found in the answer section
#[must_use]
pub fn svcb_answers(message: &Message) -> Vec<&SVCB> {
    message
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::SVCB(svcb) => Some(svcb),
            _ => None,
        })
        .collect()
}

/// Decode an SVCB record.
///
/// `scan_id` is attached to every error so breadcrumbs can be traced back to
/// the scan that observed the record.
pub fn parse_svcb(svcb: &SVCB, scan_id: &str) -> (SvcbRecord, Vec<ScanError>) {
    let mut errors = Vec::new();
    let mut record = SvcbRecord {
        priority: svcb.svc_priority(),
        target: svcb.target_name().to_string(),
        ..SvcbRecord::default()
    };

    for (key, value) in svcb.svc_params() {
        let code = u16::from(*key);
        match (code, value) {
            (KEY_ALPN, SvcParamValue::Alpn(alpn)) => record.alpn.clone_from(&alpn.0),
            (KEY_ALPN, _) => errors.push(required_key_error(scan_id, "alpn value is malformed")),
            (KEY_PORT, SvcParamValue::Port(port)) => record.port = Some(*port),
            (KEY_IPV4HINT, SvcParamValue::Ipv4Hint(hint)) => {
                record.ipv4hint = hint.0.iter().map(|a| a.0).collect();
            }
            (KEY_IPV6HINT, SvcParamValue::Ipv6Hint(hint)) => {
                record.ipv6hint = hint.0.iter().map(|a| a.0).collect();
            }
            (KEY_ECH, value) => match raw_value(value) {
                Some(config) => record.ech = Some(STANDARD.encode(config)),
                None => errors.push(cast_error(scan_id, "ech")),
            },
            (KEY_DOHPATH, value) => match raw_value(value) {
                Some(path) => match String::from_utf8(path) {
                    Ok(path) => record.dohpath = Some(path),
                    Err(_) => errors.push(cast_error(scan_id, "dohpath")),
                },
                None => errors.push(cast_error(scan_id, "dohpath")),
            },
            (KEY_ODOH, _) => record.odoh = true,
            (KEY_PORT, _) => errors.push(cast_error(scan_id, "port")),
            (KEY_IPV4HINT, _) => errors.push(cast_error(scan_id, "ipv4hint")),
            (KEY_IPV6HINT, _) => errors.push(cast_error(scan_id, "ipv6hint")),
            (other, _) => errors.push(
                ScanError::new(
                    crate::error::ErrorKind::Query,
                    ErrorCause::SvcbUnknownKey,
                    false,
                    format!("unknown SVCB key {other}"),
                )
                .add_info(format!("scan_id={scan_id}")),
            ),
        }
    }

    if record.alpn.is_empty() && !errors.iter().any(|e| e.cause == ErrorCause::SvcbRequiredKey) {
        errors.push(required_key_error(scan_id, "alpn is missing or empty"));
    }
    if record.target.is_empty() || record.target == "." {
        errors.push(required_key_error(scan_id, "target name is empty"));
    }

    (record, errors)
}

/// Returns true if any error marks the record unusable
#[must_use]
pub fn has_critical(errors: &[ScanError]) -> bool {
    errors.iter().any(|e| e.critical)
}

/// Value bytes of a parameter, without the 2-octet length prefix
fn raw_value(value: &SvcParamValue) -> Option<Vec<u8>> {
    let bytes = value.to_bytes().ok()?;
    bytes.get(2..).map(<[u8]>::to_vec)
}

#[track_caller]
fn required_key_error(scan_id: &str, message: &str) -> ScanError {
    ScanError::query(ErrorCause::SvcbRequiredKey, message).add_info(format!("scan_id={scan_id}"))
}

#[track_caller]
fn cast_error(scan_id: &str, key: &str) -> ScanError {
    ScanError::query(ErrorCause::SvcbCast, format!("could not decode SVCB key {key}"))
        .non_critical()
        .add_info(format!("scan_id={scan_id}"))
}
