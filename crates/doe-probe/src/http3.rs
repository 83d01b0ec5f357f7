//! DoH over HTTP/3.

use crate::doh::{DohRequest, HttpAnswer};
use crate::quic::QuicSession;
use crate::tls::TlsSetup;
use bytes::{Buf, Bytes};
use doe_core::types::doh::DNS_MESSAGE_MEDIA_TYPE;
use doe_core::{ErrorCause, HttpMethod, ScanError, TlsInfo};
use futures_util::future::poll_fn;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::trace;

fn stream_error(err: impl std::fmt::Display) -> ScanError {
    ScanError::query(ErrorCause::Stream, err)
}

/// Open a QUIC connection and send `request` on it.
///
/// The session is handed back next to the outcome so the caller can close
/// it once the deadline no longer applies.
pub async fn exchange(
    setup: &TlsSetup,
    server: SocketAddr,
    name: &str,
    request: &DohRequest,
    timeout: Duration,
    local: Option<IpAddr>,
) -> Result<(QuicSession, Result<(HttpAnswer, TlsInfo), ScanError>), ScanError> {
    let session = QuicSession::connect(setup, server, name, timeout, local).await?;
    let tls = session.tls_info(setup);
    let result = request_on(&session.connection, request)
        .await
        .map(|answer| (answer, tls));
    Ok((session, result))
}

/// Send `request` over HTTP/3 on `connection` and read the whole answer
async fn request_on(
    connection: &quinn::Connection,
    request: &DohRequest,
) -> Result<HttpAnswer, ScanError> {
    let (mut driver, mut sender) =
        h3::client::new(h3_quinn::Connection::new(connection.clone()))
            .await
            .map_err(|e| ScanError::query(ErrorCause::Session, e))?;
    let drive = tokio::spawn(async move {
        if let Err(e) = poll_fn(|cx| driver.poll_close(cx)).await {
            trace!(error = %e, "h3 connection closed");
        }
    });

    let method = match request.method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
    };
    let mut builder = Request::builder()
        .method(method)
        .uri(&request.url)
        .header(ACCEPT, DNS_MESSAGE_MEDIA_TYPE);
    if request.body.is_some() {
        builder = builder.header(CONTENT_TYPE, DNS_MESSAGE_MEDIA_TYPE);
    }
    let http_request = builder
        .body(())
        .map_err(|e| ScanError::query(ErrorCause::Pack, e))?;

    let answer = async {
        let mut stream = sender.send_request(http_request).await.map_err(stream_error)?;
        if let Some(body) = &request.body {
            stream
                .send_data(Bytes::from(body.clone()))
                .await
                .map_err(stream_error)?;
        }
        stream.finish().await.map_err(stream_error)?;

        let response = stream.recv_response().await.map_err(stream_error)?;
        let mut body = Vec::new();
        while let Some(mut chunk) = stream.recv_data().await.map_err(stream_error)? {
            let remaining = chunk.remaining();
            body.extend_from_slice(&chunk.copy_to_bytes(remaining));
        }
        Ok::<_, ScanError>(HttpAnswer {
            status: response.status().as_u16(),
            body,
        })
    }
    .await;
    drop(sender);
    drive.abort();
    answer
}
