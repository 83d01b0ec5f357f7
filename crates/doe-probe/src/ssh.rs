//! SSH host key collection.
//!
//! The key exchange is run far enough to see the server's host key. A
//! server that then accepts the `none` authentication method is flagged as
//! open.

use crate::config::ProbeConfig;
use crate::net;
use crate::params;
use crate::probe::Probe;
use async_trait::async_trait;
use doe_core::{ErrorCause, ScanError, SshQuery, SshResponse};
use parking_lot::Mutex;
use russh::client;
use russh::Disconnect;
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// User name offered for `none` authentication
const PROBE_USER: &str = "doe-scanner";

/// Host key seen during key exchange
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostKey {
    kind: String,
    base64: String,
}

/// Accepts any host key and remembers it
struct KeyCapture {
    seen: Arc<Mutex<Option<HostKey>>>,
}

#[async_trait]
impl client::Handler for KeyCapture {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        *self.seen.lock() = Some(HostKey {
            kind: server_public_key.name().to_string(),
            base64: server_public_key.public_key_base64(),
        });
        Ok(true)
    }
}

/// SSH probe engine
#[derive(Debug, Clone, Default)]
pub struct SshProbe {
    local_address: Option<IpAddr>,
}

impl SshProbe {
    /// Create a probe
    #[must_use]
    pub const fn new(config: &ProbeConfig) -> Self {
        Self {
            local_address: config.local_address,
        }
    }

    /// Collect the host key and test `none` authentication
    pub async fn scan(&self, query: &SshQuery) -> Result<SshResponse, ScanError> {
        params::validate(&query.host, query.port)?;
        let server = match query.ip {
            Some(ip) => SocketAddr::new(ip, query.port),
            None => net::resolve(&query.host, query.port, self.local_address)
                .await
                .map_err(|e| net::dial_error(&query.host, &e).non_critical())?,
        };

        let seen = Arc::new(Mutex::new(None));
        let handshake = async {
            let tcp = net::tcp_connect(server, self.local_address)
                .await
                .map_err(|e| net::dial_error(&server.to_string(), &e).non_critical())?;
            let handler = KeyCapture { seen: seen.clone() };
            let config = Arc::new(client::Config::default());
            let open = match client::connect_stream(config, tcp, handler).await {
                Ok(mut handle) => {
                    let open = handle.authenticate_none(PROBE_USER).await.unwrap_or(false);
                    if let Err(e) = handle
                        .disconnect(Disconnect::ByApplication, "", "en")
                        .await
                    {
                        debug!(%server, error = %e, "ssh disconnect failed");
                    }
                    open
                }
                Err(e) => {
                    debug!(%server, error = %e, "ssh handshake failed");
                    false
                }
            };
            Ok::<_, ScanError>(open)
        };

        let handshake = net::within(query.timeout, handshake).await.ok();
        let key = seen.lock().take();
        response(server, handshake, key, query.timeout)
    }
}

/// Combine the handshake outcome (`None` when it timed out) with the host
/// key captured along the way. A key seen before a timeout is reported.
fn response(
    server: SocketAddr,
    handshake: Option<Result<bool, ScanError>>,
    key: Option<HostKey>,
    timeout: Duration,
) -> Result<SshResponse, ScanError> {
    let open = match handshake {
        Some(outcome) => outcome?,
        None if key.is_some() => {
            debug!(%server, "ssh handshake timed out after key exchange");
            false
        }
        None => return Err(net::timeout_error("SSH handshake", timeout).non_critical()),
    };
    match key {
        Some(key) => Ok(SshResponse {
            ssh_enabled: true,
            open_ssh_server: open,
            host_key_type: Some(key.kind),
            host_key: Some(key.base64),
        }),
        None => Err(ScanError::query(
            ErrorCause::Session,
            format!("{server} did not complete SSH key exchange"),
        )
        .non_critical()),
    }
}

#[async_trait]
impl Probe<SshQuery> for SshProbe {
    type Output = SshResponse;

    async fn run(&self, query: &SshQuery) -> Result<SshResponse, ScanError> {
        self.scan(query).await
    }
}
