//! Scan envelopes and the query/result shapes of every scan type.

pub mod canary;
pub mod certificate;
pub mod ddr;
pub mod ddr_dnssec;
pub mod dns;
pub mod doh;
pub mod doq;
pub mod dot;
pub mod edsr;
pub mod fingerprint;
pub mod message;
pub mod metadata;
pub mod millis;
pub mod ptr;
pub mod resinfo;
pub mod scan;
pub mod ssh;
pub mod tls;

pub use canary::{CanaryDomainResult, CanaryQuery, CanaryResult, CanaryScan};
pub use certificate::{CertificateInfo, CertificateQuery, CertificateResponse, CertificateScan};
pub use ddr::{DdrQuery, DdrResult, DdrScan};
pub use ddr_dnssec::{DdrDnssecQuery, DdrDnssecResult, DdrDnssecScan};
pub use dns::{DnsQuery, DnsResponse, TransportProtocol};
pub use doh::{DohQuery, DohResponse, DohScan, HttpMethod, HttpVersion};
pub use doq::{DoqQuery, DoqResponse, DoqScan};
pub use dot::{DotQuery, DotResponse, DotScan};
pub use edsr::{EdsrHop, EdsrQuery, EdsrResult, EdsrScan};
pub use fingerprint::{FingerprintQuery, FingerprintResult, FingerprintScan, VersionAnswer};
pub use metadata::{new_id, ScanMetadata};
pub use ptr::{reverse_name, PtrQuery, PtrResult, PtrScan};
pub use resinfo::{ResinfoQuery, ResinfoResult, ResinfoScan};
pub use scan::{Scan, ScanType};
pub use ssh::{SshQuery, SshResponse};
pub use tls::{Endpoint, TlsInfo};
