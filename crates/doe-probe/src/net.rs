//! Socket helpers: resolution, source-address binding, framing, timeouts.

use doe_core::types::dns::without_root;
use doe_core::{Endpoint, ErrorCause, ScanError};
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};

/// Run `fut` under `limit`; a zero limit means no timeout
pub async fn within<T, F>(limit: Duration, fut: F) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    if limit.is_zero() {
        Ok(fut.await)
    } else {
        tokio::time::timeout(limit, fut).await
    }
}

/// Resolve `host` to a socket address.
///
/// Address literals are used as is. Names are looked up through the system
/// resolver, preferring the address family of `local` when it is set.
pub async fn resolve(host: &str, port: u16, local: Option<IpAddr>) -> io::Result<SocketAddr> {
    let host = without_root(host);
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
    let preferred = local.and_then(|l| addrs.iter().find(|a| a.is_ipv4() == l.is_ipv4()));
    preferred
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}")))
}

/// Address to dial for an encrypted endpoint
pub async fn resolve_endpoint(endpoint: &Endpoint, local: Option<IpAddr>) -> Result<SocketAddr, ScanError> {
    if let Some(ip) = endpoint.ip {
        return Ok(SocketAddr::new(ip, endpoint.port));
    }
    resolve(&endpoint.host, endpoint.port, local)
        .await
        .map_err(|e| dial_error(&endpoint.host, &e))
}

/// Local address to bind for talking to `server`
#[must_use]
pub fn bind_addr(local: Option<IpAddr>, server: &SocketAddr) -> SocketAddr {
    let ip = local.unwrap_or(if server.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    });
    SocketAddr::new(ip, 0)
}

/// Open a TCP connection from `local` (if set) to `server`
pub async fn tcp_connect(server: SocketAddr, local: Option<IpAddr>) -> io::Result<TcpStream> {
    let socket = if server.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(ip) = local {
        socket.bind(SocketAddr::new(ip, 0))?;
    }
    socket.connect(server).await
}

/// Write a message with a two-octet big-endian length prefix
pub async fn write_framed<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message exceeds 65535 octets"))?;
    let mut framed = Vec::with_capacity(payload.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    writer.write_all(&framed).await?;
    writer.flush().await
}

/// Read one message with a two-octet big-endian length prefix
pub async fn read_framed<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await?;
    let mut buf = vec![0u8; usize::from(len)];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// A dial failure
#[track_caller]
pub fn dial_error(target: &str, err: &dyn std::fmt::Display) -> ScanError {
    ScanError::query(ErrorCause::Dial, err).add_info(format!("target={target}"))
}

/// A timeout
#[track_caller]
pub fn timeout_error(operation: &str, limit: Duration) -> ScanError {
    ScanError::query(
        ErrorCause::Timeout,
        format!("{operation} timed out after {}ms", limit.as_millis()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literal() {
        let addr = resolve("192.0.2.1", 53, None).await.unwrap();
        assert_eq!(addr, "192.0.2.1:53".parse().unwrap());
        let addr = resolve("[2001:db8::1]", 443, None).await.unwrap();
        assert_eq!(addr, "[2001:db8::1]:443".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_endpoint_prefers_ip() {
        let endpoint = Endpoint::new("dns.invalid.", 853).with_ip("192.0.2.7".parse().unwrap());
        let addr = resolve_endpoint(&endpoint, None).await.unwrap();
        assert_eq!(addr, "192.0.2.7:853".parse().unwrap());
    }

    #[test]
    fn test_bind_addr_matches_family() {
        let v6: SocketAddr = "[2001:db8::1]:53".parse().unwrap();
        assert!(bind_addr(None, &v6).is_ipv6());
        let v4: SocketAddr = "192.0.2.1:53".parse().unwrap();
        assert_eq!(bind_addr(None, &v4).port(), 0);
        let local: IpAddr = "192.0.2.9".parse().unwrap();
        assert_eq!(bind_addr(Some(local), &v4).ip(), local);
    }

    #[tokio::test]
    async fn test_framing() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_framed(&mut client, b"hello").await.unwrap();
        let read = read_framed(&mut server).await.unwrap();
        assert_eq!(read, b"hello");
    }

    #[tokio::test]
    async fn test_within_zero_means_unbounded() {
        let value = within(Duration::ZERO, async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        let slow = within(Duration::from_millis(10), tokio::time::sleep(Duration::from_secs(5))).await;
        assert!(slow.is_err());
    }
}
