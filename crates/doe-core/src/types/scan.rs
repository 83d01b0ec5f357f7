//! The scan envelope: one tagged variant per scan type.

use crate::error::{CoreError, Result};
use crate::types::canary::CanaryScan;
use crate::types::certificate::CertificateScan;
use crate::types::ddr::DdrScan;
use crate::types::ddr_dnssec::DdrDnssecScan;
use crate::types::doh::DohScan;
use crate::types::doq::DoqScan;
use crate::types::dot::DotScan;
use crate::types::edsr::EdsrScan;
use crate::types::fingerprint::FingerprintScan;
use crate::types::metadata::ScanMetadata;
use crate::types::ptr::PtrScan;
use crate::types::resinfo::ResinfoScan;
use crate::types::tls::Endpoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of scan, also the discriminant of the JSON envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanType {
    /// Discovery of Designated Resolvers
    Ddr,
    /// Encrypted DNS Server Redirection
    Edsr,
    /// DNS over HTTPS
    Doh,
    /// DNS over TLS
    Dot,
    /// DNS over QUIC
    Doq,
    /// Certificate harvesting
    Certificate,
    /// Reverse lookup
    Ptr,
    /// Resolver information
    Resinfo,
    /// Canary domains
    Canary,
    /// Software fingerprint
    Fingerprint,
    /// DDR with DNSSEC
    DdrDnssec,
}

impl ScanType {
    /// Every scan type
    pub const ALL: [Self; 11] = [
        Self::Ddr,
        Self::Edsr,
        Self::Doh,
        Self::Dot,
        Self::Doq,
        Self::Certificate,
        Self::Ptr,
        Self::Resinfo,
        Self::Canary,
        Self::Fingerprint,
        Self::DdrDnssec,
    ];

    /// Identifier used in JSON, topics and configuration
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ddr => "ddr",
            Self::Edsr => "edsr",
            Self::Doh => "doh",
            Self::Dot => "dot",
            Self::Doq => "doq",
            Self::Certificate => "certificate",
            Self::Ptr => "ptr",
            Self::Resinfo => "resinfo",
            Self::Canary => "canary",
            Self::Fingerprint => "fingerprint",
            Self::DdrDnssec => "ddr-dnssec",
        }
    }

    /// Topic name without the vantage point suffix, e.g. `ddr-scan`
    #[must_use]
    pub fn base_topic(self) -> String {
        format!("{}-scan", self.as_str())
    }

    /// Topic for this scan type at `vantage_point`, e.g. `ddr-scan-eu1`
    #[must_use]
    pub fn topic(self, vantage_point: &str) -> String {
        format!("{}-{vantage_point}", self.base_topic())
    }

    /// Root scan types are created by ingesters rather than by other scans
    #[must_use]
    pub const fn is_root(self) -> bool {
        matches!(
            self,
            Self::Ddr | Self::Edsr | Self::Canary | Self::Fingerprint | Self::Resinfo | Self::DdrDnssec
        )
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::Invalid(format!("unknown scan type '{s}'")))
    }
}

/// A scan envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Scan {
    /// DDR scan
    Ddr(DdrScan),
    /// EDSR scan
    Edsr(EdsrScan),
    /// DoH scan
    Doh(DohScan),
    /// DoT scan
    Dot(DotScan),
    /// DoQ scan
    Doq(DoqScan),
    /// Certificate scan
    Certificate(CertificateScan),
    /// PTR scan
    Ptr(PtrScan),
    /// RESINFO scan
    Resinfo(ResinfoScan),
    /// Canary scan
    Canary(CanaryScan),
    /// Fingerprint scan
    Fingerprint(FingerprintScan),
    /// DDR-DNSSEC scan
    DdrDnssec(DdrDnssecScan),
}

macro_rules! each_variant {
    ($scan:expr, $inner:ident => $body:expr) => {
        match $scan {
            Scan::Ddr($inner) => $body,
            Scan::Edsr($inner) => $body,
            Scan::Doh($inner) => $body,
            Scan::Dot($inner) => $body,
            Scan::Doq($inner) => $body,
            Scan::Certificate($inner) => $body,
            Scan::Ptr($inner) => $body,
            Scan::Resinfo($inner) => $body,
            Scan::Canary($inner) => $body,
            Scan::Fingerprint($inner) => $body,
            Scan::DdrDnssec($inner) => $body,
        }
    };
}

impl Scan {
    /// Encode for the broker
    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a broker payload
    pub fn unmarshal(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Unique identifier
    #[must_use]
    pub fn scan_id(&self) -> &str {
        &self.meta().scan_id
    }

    /// Lineage, timestamps and errors
    #[must_use]
    pub const fn meta(&self) -> &ScanMetadata {
        each_variant!(self, s => &s.meta)
    }

    /// Mutable metadata
    pub fn meta_mut(&mut self) -> &mut ScanMetadata {
        each_variant!(self, s => &mut s.meta)
    }

    /// Scan type
    #[must_use]
    pub const fn scan_type(&self) -> ScanType {
        match self {
            Self::Ddr(_) => ScanType::Ddr,
            Self::Edsr(_) => ScanType::Edsr,
            Self::Doh(_) => ScanType::Doh,
            Self::Dot(_) => ScanType::Dot,
            Self::Doq(_) => ScanType::Doq,
            Self::Certificate(_) => ScanType::Certificate,
            Self::Ptr(_) => ScanType::Ptr,
            Self::Resinfo(_) => ScanType::Resinfo,
            Self::Canary(_) => ScanType::Canary,
            Self::Fingerprint(_) => ScanType::Fingerprint,
            Self::DdrDnssec(_) => ScanType::DdrDnssec,
        }
    }

    /// Topic this scan is published on
    #[must_use]
    pub fn topic(&self) -> String {
        self.scan_type().topic(&self.meta().vantage_point)
    }

    /// Content identifier derived from the observable query parameters.
    ///
    /// Two scans with equal identifiers would probe the same thing; the
    /// run cache uses this to skip duplicates.
    #[must_use]
    pub fn identifier(&self) -> String {
        let kind = self.scan_type();
        match self {
            Self::Ddr(s) => format!("{kind}|{}|{}", s.query.dns.host, s.query.dns.port),
            Self::DdrDnssec(s) => format!("{kind}|{}|{}", s.query.dns.host, s.query.dns.port),
            Self::Edsr(s) => format!("{kind}|{}|{}", s.query.target_name, s.query.protocol),
            Self::Doh(s) => format!(
                "{kind}|{}|{}|{}|{}|{:?}",
                endpoint_key(&s.query.endpoint),
                s.query.http_version,
                s.query.uri_template,
                s.query.post_fallback,
                s.query.method,
            ),
            Self::Dot(s) => format!("{kind}|{}", endpoint_key(&s.query.endpoint)),
            Self::Doq(s) => format!("{kind}|{}", endpoint_key(&s.query.endpoint)),
            Self::Certificate(s) => {
                let mut alpn = s.query.alpn.clone();
                alpn.sort();
                format!("{kind}|{}|{}", endpoint_key(&s.query.endpoint), alpn.join(","))
            }
            Self::Ptr(s) => format!("{kind}|{}|{}", s.query.address, s.query.dns.host),
            Self::Resinfo(s) => format!("{kind}|{}|{}", s.query.dns.host, s.query.target_name),
            Self::Canary(s) => format!("{kind}|{}|{}", s.query.host, s.query.port),
            Self::Fingerprint(s) => format!("{kind}|{}", s.query.host),
        }
    }

    /// Connection parameters of TLS and QUIC based scans
    #[must_use]
    pub const fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            Self::Doh(s) => Some(&s.query.endpoint),
            Self::Dot(s) => Some(&s.query.endpoint),
            Self::Doq(s) => Some(&s.query.endpoint),
            Self::Certificate(s) => Some(&s.query.endpoint),
            _ => None,
        }
    }

    /// Mutable connection parameters of TLS and QUIC based scans
    pub fn endpoint_mut(&mut self) -> Option<&mut Endpoint> {
        match self {
            Self::Doh(s) => Some(&mut s.query.endpoint),
            Self::Dot(s) => Some(&mut s.query.endpoint),
            Self::Doq(s) => Some(&mut s.query.endpoint),
            Self::Certificate(s) => Some(&mut s.query.endpoint),
            _ => None,
        }
    }

    /// Host probed by this scan, used for blocklist and address-family
    /// checks; encrypted scans report the dialed address when one is set
    #[must_use]
    pub fn target_host(&self) -> String {
        if let Some(endpoint) = self.endpoint() {
            return endpoint
                .ip
                .map_or_else(|| endpoint.host.clone(), |ip| ip.to_string());
        }
        match self {
            Self::Ddr(s) => s.query.dns.host.clone(),
            Self::DdrDnssec(s) => s.query.dns.host.clone(),
            Self::Edsr(s) => s.query.target_name.clone(),
            Self::Ptr(s) => s.query.address.to_string(),
            Self::Resinfo(s) => s.query.dns.host.clone(),
            Self::Canary(s) => s.query.host.clone(),
            Self::Fingerprint(s) => s.query.host.clone(),
            Self::Doh(_) | Self::Dot(_) | Self::Doq(_) | Self::Certificate(_) => String::new(),
        }
    }
}

fn endpoint_key(endpoint: &Endpoint) -> String {
    let ip = endpoint.ip.map(|ip| ip.to_string()).unwrap_or_default();
    let sni = endpoint.sni.as_deref().unwrap_or_default();
    format!(
        "{}|{ip}|{}|{sni}|{}",
        endpoint.host, endpoint.port, endpoint.skip_certificate_verify
    )
}

impl From<DdrScan> for Scan {
    fn from(scan: DdrScan) -> Self {
        Self::Ddr(scan)
    }
}

impl From<EdsrScan> for Scan {
    fn from(scan: EdsrScan) -> Self {
        Self::Edsr(scan)
    }
}

impl From<DohScan> for Scan {
    fn from(scan: DohScan) -> Self {
        Self::Doh(scan)
    }
}

impl From<DotScan> for Scan {
    fn from(scan: DotScan) -> Self {
        Self::Dot(scan)
    }
}

impl From<DoqScan> for Scan {
    fn from(scan: DoqScan) -> Self {
        Self::Doq(scan)
    }
}

impl From<CertificateScan> for Scan {
    fn from(scan: CertificateScan) -> Self {
        Self::Certificate(scan)
    }
}

impl From<PtrScan> for Scan {
    fn from(scan: PtrScan) -> Self {
        Self::Ptr(scan)
    }
}

impl From<ResinfoScan> for Scan {
    fn from(scan: ResinfoScan) -> Self {
        Self::Resinfo(scan)
    }
}

impl From<CanaryScan> for Scan {
    fn from(scan: CanaryScan) -> Self {
        Self::Canary(scan)
    }
}

impl From<FingerprintScan> for Scan {
    fn from(scan: FingerprintScan) -> Self {
        Self::Fingerprint(scan)
    }
}

impl From<DdrDnssecScan> for Scan {
    fn from(scan: DdrDnssecScan) -> Self {
        Self::DdrDnssec(scan)
    }
}
