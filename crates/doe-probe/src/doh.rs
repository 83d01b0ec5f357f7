//! DNS over HTTPS (RFC 8484).
//!
//! HTTP/1.1 and HTTP/2 go through reqwest with the probe's own rustls
//! configuration; HTTP/3 runs over a quinn connection (see [`crate::http3`]).

use crate::config::ProbeConfig;
use crate::http3;
use crate::net;
use crate::params;
use crate::probe::Probe;
use crate::quic;
use crate::tls::TlsSetup;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use doe_core::types::doh::DNS_MESSAGE_MEDIA_TYPE;
use doe_core::{DohQuery, DohResponse, ErrorCause, HttpMethod, HttpVersion, ScanError};
use hickory_proto::op::Message;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest URL sent as GET
pub const MAX_GET_URL_LENGTH: usize = 2048;

/// `path{?param}`, the only template form DoH resolvers advertise
const TEMPLATE_PATTERN: &str = r"^([^{}]*)\{\?([^{}=&,]+)\}$";

/// Split an RFC 8484 URI template into path and query parameter name.
///
/// `/dns-query{?dns}` yields `("/dns-query", "dns")`.
pub fn parse_uri_template(template: &str) -> Result<(String, String), ScanError> {
    let pattern =
        Regex::new(TEMPLATE_PATTERN).map_err(|e| ScanError::query(ErrorCause::Other, e))?;
    let captures = pattern
        .captures(template)
        .ok_or_else(|| ScanError::query_config(format!("malformed URI template '{template}'")))?;
    let path = &captures[1];
    let param = &captures[2];
    if path.is_empty() || param.trim().is_empty() {
        return Err(ScanError::query_config(format!(
            "malformed URI template '{template}'"
        )));
    }
    Ok((path.to_string(), param.to_string()))
}

/// A fully formed DoH request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DohRequest {
    /// Method chosen for the packed message size
    pub method: HttpMethod,
    /// Request URL
    pub url: String,
    /// POST body
    pub body: Option<Vec<u8>>,
}

/// Authority component of the request URL
fn authority(query: &DohQuery) -> String {
    let host = query.endpoint.server_name();
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        format!("[{host}]:{}", query.endpoint.port)
    } else {
        format!("{host}:{}", query.endpoint.port)
    }
}

/// Choose method and URL for the packed `payload`.
///
/// GET is used when asked for and the URL fits in
/// [`MAX_GET_URL_LENGTH`]; otherwise POST if asked for or if POST fallback
/// is enabled.
pub fn build_request(query: &DohQuery, payload: &[u8]) -> Result<DohRequest, ScanError> {
    let (path, param) = parse_uri_template(&query.uri_template)?;
    let endpoint = format!("https://{}{path}", authority(query));

    if query.method == HttpMethod::Get {
        let url = format!("{endpoint}?{param}={}", URL_SAFE_NO_PAD.encode(payload));
        if url.len() <= MAX_GET_URL_LENGTH {
            return Ok(DohRequest {
                method: HttpMethod::Get,
                url,
                body: None,
            });
        }
    }
    if query.method == HttpMethod::Post || query.post_fallback {
        return Ok(DohRequest {
            method: HttpMethod::Post,
            url: endpoint,
            body: Some(payload.to_vec()),
        });
    }
    Err(ScanError::query_config(format!(
        "GET URL exceeds {MAX_GET_URL_LENGTH} octets and POST fallback is disabled"
    )))
}

/// Status and body of an HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpAnswer {
    /// Status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

/// DoH probe engine
#[derive(Debug, Clone, Default)]
pub struct DohProbe {
    local_address: Option<IpAddr>,
}

impl DohProbe {
    /// Create a probe
    #[must_use]
    pub const fn new(config: &ProbeConfig) -> Self {
        Self {
            local_address: config.local_address,
        }
    }

    /// Send the query over the requested HTTP version
    pub async fn exchange(&self, query: &DohQuery) -> Result<DohResponse, ScanError> {
        let endpoint = &query.endpoint;
        params::validate(&endpoint.host, endpoint.port)?;
        let payload = query
            .message
            .to_vec()
            .map_err(|e| ScanError::query(ErrorCause::Pack, e))?;
        let request = build_request(query, &payload)?;
        let setup = TlsSetup::new(
            endpoint.skip_certificate_verify,
            &[query.http_version.alpn()],
            query.http_version == HttpVersion::H3,
        )?;
        let server = net::resolve_endpoint(endpoint, self.local_address).await?;
        debug!(
            url = %request.url,
            method = ?request.method,
            version = %query.http_version,
            "DoH request"
        );

        let start = Instant::now();
        let (answer, mut tls) = match query.http_version {
            HttpVersion::H3 => {
                let exchange = http3::exchange(
                    &setup,
                    server,
                    endpoint.server_name(),
                    &request,
                    endpoint.timeout,
                    self.local_address,
                );
                quic::close_after(endpoint.timeout, "DoH exchange", exchange).await?
            }
            HttpVersion::H1 | HttpVersion::H2 => {
                let answer = net::within(
                    endpoint.timeout,
                    self.exchange_reqwest(&setup, server, query, &request),
                )
                .await
                .map_err(|_| net::timeout_error("DoH exchange", endpoint.timeout))??;
                (answer, setup.outcome.info())
            }
        };
        let rtt = start.elapsed().max(Duration::from_nanos(1));
        if tls.alpn.is_none() {
            tls.alpn = Some(query.http_version.alpn().to_string());
        }
        let message = decode_answer(&answer)?;
        Ok(DohResponse {
            message,
            rtt,
            status: answer.status,
            method: request.method,
            http_version: query.http_version,
            url: request.url,
            tls,
        })
    }

    async fn exchange_reqwest(
        &self,
        setup: &TlsSetup,
        server: SocketAddr,
        query: &DohQuery,
        request: &DohRequest,
    ) -> Result<HttpAnswer, ScanError> {
        let mut builder = reqwest::Client::builder()
            .use_preconfigured_tls((*setup.config).clone())
            .local_address(self.local_address)
            .resolve(query.endpoint.server_name(), server);
        builder = match query.http_version {
            HttpVersion::H1 => builder.http1_only(),
            _ => builder.http2_prior_knowledge(),
        };
        if !query.endpoint.timeout.is_zero() {
            builder = builder.timeout(query.endpoint.timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ScanError::query(ErrorCause::Session, e))?;

        let pending = match (&request.method, &request.body) {
            (HttpMethod::Post, Some(body)) => client
                .post(&request.url)
                .header(CONTENT_TYPE, DNS_MESSAGE_MEDIA_TYPE)
                .body(body.clone()),
            _ => client.get(&request.url),
        };
        let response = pending
            .header(ACCEPT, DNS_MESSAGE_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| reqwest_error(setup, &e, query.endpoint.timeout))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ScanError::query(ErrorCause::Stream, e))?;
        Ok(HttpAnswer {
            status,
            body: body.to_vec(),
        })
    }
}

/// Map a non-2xx status to an error and decode the body
fn decode_answer(answer: &HttpAnswer) -> Result<Message, ScanError> {
    if !(200..300).contains(&answer.status) {
        return Err(ScanError::query(
            ErrorCause::HttpStatus,
            format!(
                "HTTP {}: {}",
                answer.status,
                String::from_utf8_lossy(&answer.body)
            ),
        ));
    }
    if answer.body.is_empty() {
        return Err(ScanError::query(ErrorCause::EmptyResponse, "empty DoH body"));
    }
    Message::from_vec(&answer.body).map_err(|e| ScanError::query(ErrorCause::Unpack, e))
}

fn reqwest_error(setup: &TlsSetup, err: &reqwest::Error, timeout: Duration) -> ScanError {
    if err.is_timeout() {
        return net::timeout_error("DoH request", timeout);
    }
    // reqwest wraps the handshake error; the recorded verdict decides
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message = format!("{message}: {inner}");
        source = inner.source();
    }
    setup.classify(&message)
}

#[async_trait]
impl Probe<DohQuery> for DohProbe {
    type Output = DohResponse;

    async fn run(&self, query: &DohQuery) -> Result<DohResponse, ScanError> {
        self.exchange(query).await
    }
}
