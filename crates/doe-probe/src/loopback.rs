//! Local TLS and QUIC responders for engine tests.

use doe_core::testing::{a_rdata, ResponseBuilder};
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use quinn::crypto::rustls::QuicServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Name in the subject alternative names of the served certificate
pub const SAN: &str = "dns.test";

/// Address returned in every answer
pub const ANSWER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

/// A fresh self-signed certificate for [`SAN`] and its key
pub fn self_signed() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let certified = rcgen::generate_simple_self_signed(vec![SAN.to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
    (
        vec![CertificateDer::from(certified.cert.der().to_vec())],
        PrivateKeyDer::Pkcs8(key),
    )
}

/// Server configuration presenting a self-signed chain; no ALPN means the
/// client's offer is ignored
pub fn server_config(alpn: &[&str], tls13_only: bool) -> ServerConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider);
    let builder = if tls13_only {
        builder.with_protocol_versions(&[&rustls::version::TLS13])
    } else {
        builder.with_safe_default_protocol_versions()
    }
    .unwrap();
    let (chain, key) = self_signed();
    let mut config = builder
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    config
}

/// Accept TLS connections on a loopback port and pass each established
/// stream to `handler`. Failed handshakes are dropped.
pub async fn serve_tls<F, Fut>(config: ServerConfig, handler: F) -> SocketAddr
where
    F: Fn(TlsStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Ok(stream) = acceptor.accept(tcp).await {
                    handler(stream).await;
                }
            });
        }
    });
    addr
}

/// A loopback port that closes every connection without speaking TLS
pub async fn serve_plain_close() -> SocketAddr {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            drop(tcp);
        }
    });
    addr
}

/// QUIC server endpoint on a loopback port
pub fn quic_server(alpn: &[&str]) -> (quinn::Endpoint, SocketAddr) {
    let crypto = QuicServerConfig::try_from(server_config(alpn, true)).unwrap();
    let config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    let endpoint =
        quinn::Endpoint::server(config, SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
    let addr = endpoint.local_addr().unwrap();
    (endpoint, addr)
}

/// Wire answer to the wire `query`: same ID and question, one A record
pub fn answer_to(query: &[u8]) -> Vec<u8> {
    let query = Message::from_vec(query).unwrap();
    let name = query.queries()[0].name().to_string();
    ResponseBuilder::new(&name, RecordType::A)
        .id(query.id())
        .answer(&name, 60, a_rdata(ANSWER))
        .to_wire()
}
