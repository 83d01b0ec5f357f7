//! QUIC connection setup shared by DoQ and HTTP/3.

use crate::net;
use crate::tls::TlsSetup;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use doe_core::{ErrorCause, ScanError, TlsInfo};
use quinn::crypto::rustls::{HandshakeData, QuicClientConfig};
use quinn::{Connection, IdleTimeout, TransportConfig};
use rustls::pki_types::CertificateDer;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// A connection torn down once its exchange is over
#[async_trait]
pub trait Session: Send {
    /// Close the connection
    async fn close(self);
}

/// Run `exchange` under `limit`, then close the session it hands back.
///
/// The close is not charged to `limit`: a finished exchange keeps its
/// result however long the teardown takes.
pub async fn close_after<S, T, F>(
    limit: Duration,
    operation: &str,
    exchange: F,
) -> Result<T, ScanError>
where
    S: Session,
    F: Future<Output = Result<(S, Result<T, ScanError>), ScanError>>,
{
    let (session, result) = net::within(limit, exchange)
        .await
        .map_err(|_| net::timeout_error(operation, limit))??;
    session.close().await;
    result
}

/// An established QUIC connection and the endpoint that owns it
pub struct QuicSession {
    /// Client endpoint; must outlive `connection`
    pub endpoint: quinn::Endpoint,
    /// Established connection
    pub connection: Connection,
}

impl QuicSession {
    /// Open a connection to `server` presenting `name`.
    ///
    /// `timeout` bounds the idle period of the connection, including the
    /// handshake; zero leaves quinn's default in place.
    pub async fn connect(
        setup: &TlsSetup,
        server: SocketAddr,
        name: &str,
        timeout: Duration,
        local: Option<IpAddr>,
    ) -> Result<Self, ScanError> {
        let crypto = QuicClientConfig::try_from(setup.config.clone())
            .map_err(|e| ScanError::query(ErrorCause::Session, e))?;
        let mut config = quinn::ClientConfig::new(Arc::new(crypto));
        if !timeout.is_zero() {
            let mut transport = TransportConfig::default();
            let idle = IdleTimeout::try_from(timeout)
                .map_err(|e| ScanError::query_config(format!("timeout out of range: {e}")))?;
            transport.max_idle_timeout(Some(idle));
            config.transport_config(Arc::new(transport));
        }

        let endpoint = quinn::Endpoint::client(net::bind_addr(local, &server))
            .map_err(|e| net::dial_error(&server.to_string(), &e))?;
        let connecting = endpoint
            .connect_with(config, server, name)
            .map_err(|e| net::dial_error(&server.to_string(), &e))?;
        let connection = connecting.await.map_err(|e| setup.classify(&e))?;
        Ok(Self {
            endpoint,
            connection,
        })
    }

    /// Session properties of the established connection
    #[must_use]
    pub fn tls_info(&self, setup: &TlsSetup) -> TlsInfo {
        let mut info = setup.outcome.info();
        info.version = Some("TLSv1_3".to_string());
        info.alpn = self
            .connection
            .handshake_data()
            .and_then(|data| data.downcast::<HandshakeData>().ok())
            .and_then(|data| data.protocol)
            .map(|p| String::from_utf8_lossy(&p).into_owned());
        if info.peer_certificates.is_empty() {
            if let Some(chain) = self
                .connection
                .peer_identity()
                .and_then(|id| id.downcast::<Vec<CertificateDer<'static>>>().ok())
            {
                info.peer_certificates = chain.iter().map(|der| STANDARD.encode(der)).collect();
            }
        }
        info
    }
}

#[async_trait]
impl Session for QuicSession {
    /// Close with application error code 0. The endpoint is kept alive in
    /// the background until the connection has drained.
    async fn close(self) {
        self.connection.close(0u32.into(), b"");
        let endpoint = self.endpoint;
        tokio::spawn(async move { endpoint.wait_idle().await });
    }
}
