//! Certificate harvesting over TLS.

use crate::config::ProbeConfig;
use crate::net;
use crate::params;
use crate::probe::Probe;
use crate::tls::{self, TlsSetup};
use async_trait::async_trait;
use chrono::DateTime;
use doe_core::{CertificateInfo, CertificateQuery, CertificateResponse, ErrorCause, ScanError};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use x509_parser::prelude::{parse_x509_certificate, GeneralName};

/// ALPN identifiers that only exist over QUIC
const QUIC_ONLY_ALPN: [&str; 3] = ["h3", "doq", "dq"];

/// Parse one DER certificate
pub fn parse_certificate(der: &[u8]) -> Result<CertificateInfo, ScanError> {
    let (_, cert) =
        parse_x509_certificate(der).map_err(|e| ScanError::query(ErrorCause::Unpack, e))?;

    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => dns_names.push((*dns).to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_octets(bytes) {
                        ip_addresses.push(ip.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    let validity = cert.validity();
    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
        not_before: DateTime::from_timestamp(validity.not_before.timestamp(), 0),
        not_after: DateTime::from_timestamp(validity.not_after.timestamp(), 0),
        dns_names,
        ip_addresses,
        signature_algorithm: cert.signature_algorithm.algorithm.to_id_string(),
        is_ca: cert.is_ca(),
    })
}

fn ip_from_octets(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(|o| IpAddr::V4(Ipv4Addr::from(o))),
        16 => <[u8; 16]>::try_from(bytes).ok().map(|o| IpAddr::V6(Ipv6Addr::from(o))),
        _ => None,
    }
}

/// Parse every certificate of a chain, skipping the ones that fail
fn parse_chain(chain: &[Vec<u8>]) -> Vec<CertificateInfo> {
    chain
        .iter()
        .filter_map(|der| match parse_certificate(der) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "unparseable certificate in chain");
                None
            }
        })
        .collect()
}

/// Certificate probe engine
#[derive(Debug, Clone, Default)]
pub struct CertificateProbe {
    local_address: Option<IpAddr>,
}

impl CertificateProbe {
    /// Create a probe
    #[must_use]
    pub const fn new(config: &ProbeConfig) -> Self {
        Self {
            local_address: config.local_address,
        }
    }

    /// Complete a handshake and collect the presented chain.
    ///
    /// A chain that fails enforced verification is still returned, with
    /// `retry_without_certificate_verification` set and the failure in
    /// `tls.certificate_error`.
    pub async fn collect(&self, query: &CertificateQuery) -> Result<CertificateResponse, ScanError> {
        let endpoint = &query.endpoint;
        params::validate(&endpoint.host, endpoint.port)?;
        let alpn: Vec<&str> = query
            .alpn
            .iter()
            .map(String::as_str)
            .filter(|id| !QUIC_ONLY_ALPN.contains(id))
            .collect();
        let setup = TlsSetup::new(endpoint.skip_certificate_verify, &alpn, false)?;
        let name = tls::server_name(endpoint.server_name())?;
        let server = net::resolve_endpoint(endpoint, self.local_address).await?;

        let handshake = async {
            let tcp = net::tcp_connect(server, self.local_address)
                .await
                .map_err(|e| net::dial_error(&server.to_string(), &e))?;
            let start = Instant::now();
            let outcome = TlsConnector::from(setup.config.clone()).connect(name, tcp).await;
            let rtt = start.elapsed().max(Duration::from_nanos(1));
            match outcome {
                Ok(stream) => {
                    let tls = setup.session_info(stream.get_ref().1);
                    Ok(CertificateResponse {
                        certificates: parse_chain(&setup.outcome.chain()),
                        tls,
                        rtt,
                        retry_without_certificate_verification: false,
                    })
                }
                Err(e) => {
                    let err = setup.classify(&e);
                    if !err.is_certificate_error() {
                        return Err(err);
                    }
                    debug!(%server, error = %err, "certificate rejected, chain retained");
                    Ok(CertificateResponse {
                        certificates: parse_chain(&setup.outcome.chain()),
                        tls: setup.outcome.info(),
                        rtt,
                        retry_without_certificate_verification: true,
                    })
                }
            }
        };

        net::within(endpoint.timeout, handshake)
            .await
            .map_err(|_| net::timeout_error("TLS handshake", endpoint.timeout))?
    }
}

#[async_trait]
impl Probe<CertificateQuery> for CertificateProbe {
    type Output = CertificateResponse;

    async fn run(&self, query: &CertificateQuery) -> Result<CertificateResponse, ScanError> {
        self.collect(query).await
    }
}
