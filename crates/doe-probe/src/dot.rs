//! DNS over TLS (RFC 7858).

use crate::config::ProbeConfig;
use crate::net;
use crate::params;
use crate::probe::Probe;
use crate::tls::{self, TlsSetup};
use async_trait::async_trait;
use doe_core::{DotQuery, DotResponse, ErrorCause, ScanError};
use hickory_proto::op::Message;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// ALPN identifier for DoT
pub const ALPN: &str = "dot";

/// DoT probe engine
#[derive(Debug, Clone, Default)]
pub struct DotProbe {
    local_address: Option<IpAddr>,
}

impl DotProbe {
    /// Create a probe
    #[must_use]
    pub const fn new(config: &ProbeConfig) -> Self {
        Self {
            local_address: config.local_address,
        }
    }

    /// Send the query and read one response
    pub async fn exchange(&self, query: &DotQuery) -> Result<DotResponse, ScanError> {
        let endpoint = &query.endpoint;
        params::validate(&endpoint.host, endpoint.port)?;
        let payload = query
            .message
            .to_vec()
            .map_err(|e| ScanError::query(ErrorCause::Pack, e))?;
        let setup = TlsSetup::new(endpoint.skip_certificate_verify, &[ALPN], false)?;
        let name = tls::server_name(endpoint.server_name())?;
        let server = net::resolve_endpoint(endpoint, self.local_address).await?;

        let session = async {
            let tcp = net::tcp_connect(server, self.local_address)
                .await
                .map_err(|e| net::dial_error(&server.to_string(), &e))?;
            let mut stream = TlsConnector::from(setup.config.clone())
                .connect(name, tcp)
                .await
                .map_err(|e| setup.classify(&e))?;
            let info = setup.session_info(stream.get_ref().1);
            debug!(%server, version = ?info.version, "tls session established");

            let start = Instant::now();
            net::write_framed(&mut stream, &payload)
                .await
                .map_err(|e| ScanError::query(ErrorCause::Stream, e))?;
            let bytes = net::read_framed(&mut stream)
                .await
                .map_err(|e| ScanError::query(ErrorCause::Stream, e))?;
            let rtt = start.elapsed().max(Duration::from_nanos(1));
            if bytes.is_empty() {
                return Err(ScanError::query(ErrorCause::EmptyResponse, "empty DoT response"));
            }
            let message =
                Message::from_vec(&bytes).map_err(|e| ScanError::query(ErrorCause::Unpack, e))?;
            Ok(DotResponse {
                message,
                rtt,
                tls: info,
            })
        };

        net::within(endpoint.timeout, session)
            .await
            .map_err(|_| net::timeout_error("DoT exchange", endpoint.timeout))?
    }
}

#[async_trait]
impl Probe<DotQuery> for DotProbe {
    type Output = DotResponse;

    async fn run(&self, query: &DotQuery) -> Result<DotResponse, ScanError> {
        self.exchange(query).await
    }
}
