//! DNS over QUIC (RFC 9250).
//!
//! One query per bidirectional stream. The message ID is zero on the wire,
//! the message carries a two-octet length prefix, and the client sends FIN
//! before reading the answer.

use crate::config::ProbeConfig;
use crate::net;
use crate::params;
use crate::probe::Probe;
use crate::quic::{self, QuicSession};
use crate::tls::TlsSetup;
use async_trait::async_trait;
use doe_core::types::doq::ALPN;
use doe_core::{DoqQuery, DoqResponse, ErrorCause, ScanError, TlsInfo};
use hickory_proto::op::Message;
use std::io;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Largest response read from a stream
const MAX_RESPONSE: usize = 65_537;

/// Prepend the two-octet big-endian length of `packed`
pub fn add_quic_prefix(packed: &[u8]) -> Result<Vec<u8>, ScanError> {
    let len = u16::try_from(packed.len()).map_err(|_| {
        ScanError::query(
            ErrorCause::Pack,
            format!("message of {} octets exceeds 65535", packed.len()),
        )
    })?;
    let mut framed = Vec::with_capacity(packed.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(packed);
    Ok(framed)
}

/// Remove the length prefix from a stream's contents, checking it matches
pub fn strip_quic_prefix(framed: &[u8]) -> Result<&[u8], ScanError> {
    if framed.len() < 2 {
        return Err(ScanError::query(
            ErrorCause::EmptyResponse,
            format!("stream returned {} octets", framed.len()),
        ));
    }
    let declared = usize::from(u16::from_be_bytes([framed[0], framed[1]]));
    let body = &framed[2..];
    if declared != body.len() {
        return Err(ScanError::query(
            ErrorCause::Unpack,
            format!("length prefix {declared} does not match {} octets", body.len()),
        ));
    }
    Ok(body)
}

/// The parts of a bidirectional QUIC stream a DoQ exchange needs
#[async_trait]
pub trait DoqStream: Send {
    /// Write all of `buf`
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// Close the sending side (FIN)
    fn finish(&mut self) -> io::Result<()>;
    /// Read until the peer finishes, up to `limit` octets
    async fn read_to_end(&mut self, limit: usize) -> io::Result<Vec<u8>>;
}

/// A quinn stream pair
pub struct QuinnStream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
}

#[async_trait]
impl DoqStream for QuinnStream {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.send.write_all(buf).await.map_err(io::Error::other)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.send.finish().map_err(io::Error::other)
    }

    async fn read_to_end(&mut self, limit: usize) -> io::Result<Vec<u8>> {
        self.recv.read_to_end(limit).await.map_err(io::Error::other)
    }
}

/// Run one query on `stream` and decode the answer
pub async fn exchange_on_stream<S: DoqStream>(
    stream: &mut S,
    message: &Message,
) -> Result<Message, ScanError> {
    let mut message = message.clone();
    message.set_id(0);
    let packed = message
        .to_vec()
        .map_err(|e| ScanError::query(ErrorCause::Pack, e))?;
    let framed = add_quic_prefix(&packed)?;

    stream
        .write_all(&framed)
        .await
        .map_err(|e| ScanError::query(ErrorCause::Stream, e))?;
    stream
        .finish()
        .map_err(|e| ScanError::query(ErrorCause::Stream, e))?;
    let bytes = stream
        .read_to_end(MAX_RESPONSE)
        .await
        .map_err(|e| ScanError::query(ErrorCause::Stream, e))?;

    let body = strip_quic_prefix(&bytes)?;
    Message::from_vec(body).map_err(|e| ScanError::query(ErrorCause::Unpack, e))
}

/// DoQ probe engine
#[derive(Debug, Clone, Default)]
pub struct DoqProbe {
    local_address: Option<IpAddr>,
}

impl DoqProbe {
    /// Create a probe
    #[must_use]
    pub const fn new(config: &ProbeConfig) -> Self {
        Self {
            local_address: config.local_address,
        }
    }

    /// Open a session, exchange one query, close with code 0.
    ///
    /// Only connecting and the exchange count against the timeout.
    pub async fn exchange(&self, query: &DoqQuery) -> Result<DoqResponse, ScanError> {
        let endpoint = &query.endpoint;
        params::validate(&endpoint.host, endpoint.port)?;
        let setup = TlsSetup::new(endpoint.skip_certificate_verify, &ALPN, true)?;
        let server = net::resolve_endpoint(endpoint, self.local_address).await?;
        let name = endpoint.server_name().to_string();

        let exchange = async {
            let session =
                QuicSession::connect(&setup, server, &name, endpoint.timeout, self.local_address)
                    .await?;
            let tls = session.tls_info(&setup);
            debug!(%server, alpn = ?tls.alpn, "quic session established");
            let result = query_on(&session.connection, &query.message, tls).await;
            Ok::<_, ScanError>((session, result))
        };
        quic::close_after(endpoint.timeout, "DoQ exchange", exchange).await
    }
}

/// Exchange `message` on a fresh bidirectional stream of `connection`
async fn query_on(
    connection: &quinn::Connection,
    message: &Message,
    tls: TlsInfo,
) -> Result<DoqResponse, ScanError> {
    let (send, recv) = connection
        .open_bi()
        .await
        .map_err(|e| ScanError::query(ErrorCause::Stream, e))?;
    let mut stream = QuinnStream { send, recv };
    let start = Instant::now();
    let message = exchange_on_stream(&mut stream, message).await?;
    Ok(DoqResponse {
        message,
        rtt: start.elapsed().max(Duration::from_nanos(1)),
        tls,
    })
}

#[async_trait]
impl Probe<DoqQuery> for DoqProbe {
    type Output = DoqResponse;

    async fn run(&self, query: &DoqQuery) -> Result<DoqResponse, ScanError> {
        self.exchange(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{self, answer_to, ANSWER};
    use doe_core::testing::{a_rdata, ResponseBuilder};
    use doe_core::types::dns::{build_query, record_addresses};
    use doe_core::{Endpoint, ErrorKind};
    use hickory_proto::rr::RecordType;
    use std::net::SocketAddr;
    use tokio::sync::oneshot;

    /// DoQ responder for one connection; reports the message ID it received
    fn doq_server() -> (SocketAddr, oneshot::Receiver<u16>) {
        let (server, addr) = loopback::quic_server(&ALPN);
        let (seen, received) = oneshot::channel();
        tokio::spawn(async move {
            let Some(incoming) = server.accept().await else {
                return;
            };
            let Ok(connection) = incoming.await else {
                return;
            };
            let Ok((mut send, mut recv)) = connection.accept_bi().await else {
                return;
            };
            let framed = recv.read_to_end(MAX_RESPONSE).await.unwrap();
            let query = strip_quic_prefix(&framed).unwrap();
            seen.send(Message::from_vec(query).unwrap().id()).ok();
            let answer = add_quic_prefix(&answer_to(query)).unwrap();
            send.write_all(&answer).await.unwrap();
            send.finish().unwrap();
            connection.closed().await;
        });
        (addr, received)
    }

    fn loopback_query(addr: SocketAddr, skip_verify: bool) -> DoqQuery {
        let mut message = build_query("example.com.", RecordType::A, false).unwrap();
        message.set_id(0x1234);
        let mut endpoint = Endpoint::new("127.0.0.1", addr.port());
        endpoint.skip_certificate_verify = skip_verify;
        DoqQuery::new(endpoint.with_timeout(Duration::from_secs(5)), message)
    }

    /// In-memory stream that records writes and answers once finished
    struct FakeStream {
        written: Vec<u8>,
        finished: bool,
        finished_before_read: bool,
        answer: Vec<u8>,
    }

    impl FakeStream {
        fn answering(answer: Vec<u8>) -> Self {
            Self {
                written: Vec::new(),
                finished: false,
                finished_before_read: false,
                answer,
            }
        }
    }

    #[async_trait]
    impl DoqStream for FakeStream {
        async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.written.extend_from_slice(buf);
            Ok(())
        }

        fn finish(&mut self) -> io::Result<()> {
            self.finished = true;
            Ok(())
        }

        async fn read_to_end(&mut self, _limit: usize) -> io::Result<Vec<u8>> {
            self.finished_before_read = self.finished;
            Ok(self.answer.clone())
        }
    }

    fn response() -> Vec<u8> {
        let wire = ResponseBuilder::new("example.com.", RecordType::A)
            .id(0)
            .answer("example.com.", 60, a_rdata("192.0.2.1".parse().unwrap()))
            .to_wire();
        add_quic_prefix(&wire).unwrap()
    }

    #[test]
    fn test_prefix_roundtrip() {
        let body = vec![0xAB; 300];
        let framed = add_quic_prefix(&body).unwrap();
        assert_eq!(&framed[..2], &[0x01, 0x2C]);
        assert_eq!(strip_quic_prefix(&framed).unwrap(), body.as_slice());
    }

    #[test]
    fn test_prefix_limits() {
        assert!(add_quic_prefix(&vec![0; 65_535]).is_ok());
        assert_eq!(
            add_quic_prefix(&vec![0; 65_536]).unwrap_err().cause,
            ErrorCause::Pack
        );
        assert_eq!(
            strip_quic_prefix(&[0x00]).unwrap_err().cause,
            ErrorCause::EmptyResponse
        );
        assert_eq!(
            strip_quic_prefix(&[0x00, 0x05, 0x01]).unwrap_err().cause,
            ErrorCause::Unpack
        );
    }

    #[tokio::test]
    async fn test_stream_wire_format() {
        let mut message = build_query("example.com.", RecordType::A, false).unwrap();
        message.set_id(0x1234);
        let mut stream = FakeStream::answering(response());

        let answer = exchange_on_stream(&mut stream, &message).await.unwrap();
        assert_eq!(answer.answers().len(), 1);

        let len = stream.written.len() - 2;
        assert_eq!(stream.written[0], u8::try_from(len >> 8).unwrap());
        assert_eq!(stream.written[1], u8::try_from(len & 0xFF).unwrap());
        let sent = Message::from_vec(&stream.written[2..]).unwrap();
        assert_eq!(sent.id(), 0);
        assert!(stream.finished_before_read);
        // the caller's message is untouched
        assert_eq!(message.id(), 0x1234);
    }

    #[tokio::test]
    async fn test_short_stream_is_empty_response() {
        let message = build_query("example.com.", RecordType::A, false).unwrap();
        let mut stream = FakeStream::answering(Vec::new());
        let err = exchange_on_stream(&mut stream, &message).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Query);
        assert_eq!(err.cause, ErrorCause::EmptyResponse);
    }

    #[tokio::test]
    async fn test_exchange_over_quic() {
        let (addr, received) = doq_server();
        let response = DoqProbe::default()
            .exchange(&loopback_query(addr, true))
            .await
            .unwrap();

        assert_eq!(received.await.unwrap(), 0);
        assert_eq!(
            record_addresses(response.message.answers()),
            vec![IpAddr::V4(ANSWER)]
        );
        assert_eq!(response.tls.alpn.as_deref(), Some("doq"));
        assert!(!response.tls.certificate_valid);
        assert_eq!(response.tls.peer_certificates.len(), 1);
    }

    #[tokio::test]
    async fn test_self_signed_rejected_when_verifying() {
        let (addr, _received) = doq_server();
        let err = DoqProbe::default()
            .exchange(&loopback_query(addr, false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Certificate);
        assert!(err.critical);
    }

    #[tokio::test]
    async fn test_rejects_port_zero() {
        let message = build_query("example.com.", RecordType::A, false).unwrap();
        let query = DoqQuery::new(Endpoint::new("192.0.2.1", 0), message);
        let err = DoqProbe::default().exchange(&query).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::QueryConfig);
    }
}
