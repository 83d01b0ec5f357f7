//! Classical DNS over UDP and TCP.
//!
//! UDP is attempted first (unless the query asks for TCP), with exponential
//! backoff between attempts. A truncated UDP answer ends the UDP phase at
//! once; TCP is then tried when the query is TCP-only, when fallback is
//! enabled, or both.

use crate::config::{BackoffConfig, ProbeConfig};
use crate::net;
use crate::params;
use crate::probe::Probe;
use async_trait::async_trait;
use doe_core::{DnsQuery, DnsResponse, ErrorCause, ScanError, TransportProtocol};
use hickory_proto::op::Message;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Largest UDP datagram accepted
const MAX_DATAGRAM: usize = 65_535;

/// Carries one packed DNS message to a server and returns the raw answer
#[async_trait]
pub trait DnsTransport: Send + Sync {
    /// Exchange `payload` with `server`; the timeout covers the whole exchange
    async fn exchange(
        &self,
        server: SocketAddr,
        protocol: TransportProtocol,
        payload: &[u8],
        timeout: Duration,
    ) -> io::Result<Vec<u8>>;
}

/// Sockets on the real network
#[derive(Debug, Clone, Default)]
pub struct NetworkTransport {
    local_address: Option<IpAddr>,
}

impl NetworkTransport {
    /// Transport binding to `local_address` when set
    #[must_use]
    pub const fn new(local_address: Option<IpAddr>) -> Self {
        Self { local_address }
    }

    async fn udp(&self, server: SocketAddr, payload: &[u8]) -> io::Result<Vec<u8>> {
        let socket = UdpSocket::bind(net::bind_addr(self.local_address, &server)).await?;
        socket.connect(server).await?;
        socket.send(payload).await?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = socket.recv(&mut buf).await?;
            // Datagrams with a foreign ID are stale or spoofed
            if n >= 2 && payload.len() >= 2 && buf[..2] == payload[..2] {
                buf.truncate(n);
                return Ok(buf);
            }
            trace!(%server, "ignoring datagram with mismatched id");
        }
    }

    async fn tcp(&self, server: SocketAddr, payload: &[u8]) -> io::Result<Vec<u8>> {
        let mut stream = net::tcp_connect(server, self.local_address).await?;
        net::write_framed(&mut stream, payload).await?;
        net::read_framed(&mut stream).await
    }
}

#[async_trait]
impl DnsTransport for NetworkTransport {
    async fn exchange(
        &self,
        server: SocketAddr,
        protocol: TransportProtocol,
        payload: &[u8],
        timeout: Duration,
    ) -> io::Result<Vec<u8>> {
        let exchange = async {
            match protocol {
                TransportProtocol::Udp => self.udp(server, payload).await,
                TransportProtocol::Tcp => self.tcp(server, payload).await,
            }
        };
        net::within(timeout, exchange)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "exchange timed out"))?
    }
}

/// Outcome of one attempt
enum Attempt {
    Answer(Message, Duration),
    Truncated(Message, Duration),
    Failed(String),
}

/// DNS probe engine
#[derive(Debug, Clone)]
pub struct DnsProbe<T = NetworkTransport> {
    transport: T,
    backoff: BackoffConfig,
    local_address: Option<IpAddr>,
}

impl DnsProbe<NetworkTransport> {
    /// Engine using real sockets
    #[must_use]
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            transport: NetworkTransport::new(config.local_address),
            backoff: config.backoff,
            local_address: config.local_address,
        }
    }
}

impl<T: DnsTransport> DnsProbe<T> {
    /// Engine using a custom transport
    #[must_use]
    pub fn with_transport(transport: T, config: &ProbeConfig) -> Self {
        Self {
            transport,
            backoff: config.backoff,
            local_address: config.local_address,
        }
    }

    /// Execute `query` with its retry and fallback budget
    pub async fn exchange(&self, query: &DnsQuery) -> Result<DnsResponse, ScanError> {
        params::validate(&query.host, query.port)?;
        let payload = query
            .message
            .to_vec()
            .map_err(|e| ScanError::query(ErrorCause::Pack, e))?;
        let server = net::resolve(&query.host, query.port, self.local_address)
            .await
            .map_err(|e| net::dial_error(&query.host, &e))?;
        let id = query.message.id();

        let mut udp_attempts = 0;
        let mut tcp_attempts = 0;
        let mut truncated = None;
        let mut failures = Vec::new();

        if query.protocol == TransportProtocol::Udp {
            for retry in 0..query.max_udp_retries {
                self.wait(retry, query.max_backoff_time).await;
                udp_attempts += 1;
                match self
                    .attempt(server, TransportProtocol::Udp, &payload, id, query)
                    .await
                {
                    Attempt::Answer(message, rtt) => {
                        return Ok(DnsResponse {
                            message,
                            rtt,
                            protocol: TransportProtocol::Udp,
                            udp_attempts,
                            tcp_attempts,
                        });
                    }
                    Attempt::Truncated(message, rtt) => {
                        debug!(%server, "truncated UDP answer");
                        truncated = Some((message, rtt));
                        break;
                    }
                    Attempt::Failed(reason) => failures.push(reason),
                }
            }
        }

        if query.protocol == TransportProtocol::Tcp || query.auto_fallback_tcp {
            for retry in 0..query.max_tcp_retries {
                self.wait(retry, query.max_backoff_time).await;
                tcp_attempts += 1;
                match self
                    .attempt(server, TransportProtocol::Tcp, &payload, id, query)
                    .await
                {
                    Attempt::Answer(message, rtt) | Attempt::Truncated(message, rtt) => {
                        return Ok(DnsResponse {
                            message,
                            rtt,
                            protocol: TransportProtocol::Tcp,
                            udp_attempts,
                            tcp_attempts,
                        });
                    }
                    Attempt::Failed(reason) => failures.push(reason),
                }
            }
        }

        if let Some((message, rtt)) = truncated {
            return Ok(DnsResponse {
                message,
                rtt,
                protocol: TransportProtocol::Udp,
                udp_attempts,
                tcp_attempts,
            });
        }

        let mut err = ScanError::no_response(format!("no response from {server}"))
            .add_info(format!("udp_attempts={udp_attempts}, tcp_attempts={tcp_attempts}"));
        if let Some(last) = failures.last() {
            err = err.add_info(last);
        }
        Err(err)
    }

    async fn wait(&self, retry: u32, max_backoff: Duration) {
        let delay = self.backoff.backoff_for(retry, max_backoff);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        server: SocketAddr,
        protocol: TransportProtocol,
        payload: &[u8],
        id: u16,
        query: &DnsQuery,
    ) -> Attempt {
        let start = Instant::now();
        let bytes = match self
            .transport
            .exchange(server, protocol, payload, query.timeout_for(protocol))
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => return Attempt::Failed(format!("{protocol}: {e}")),
        };
        let rtt = start.elapsed().max(Duration::from_nanos(1));
        let message = match Message::from_vec(&bytes) {
            Ok(message) => message,
            Err(e) => return Attempt::Failed(format!("{protocol}: unpack: {e}")),
        };
        if message.id() != id {
            return Attempt::Failed(format!("{protocol}: id mismatch ({} != {id})", message.id()));
        }
        if message.truncated() {
            Attempt::Truncated(message, rtt)
        } else {
            Attempt::Answer(message, rtt)
        }
    }
}

#[async_trait]
impl<T: DnsTransport> Probe<DnsQuery> for DnsProbe<T> {
    type Output = DnsResponse;

    async fn run(&self, query: &DnsQuery) -> Result<DnsResponse, ScanError> {
        self.exchange(query).await
    }
}
