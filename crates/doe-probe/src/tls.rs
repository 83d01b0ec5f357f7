//! TLS client setup with recorded certificate verification.
//!
//! Every handshake runs the web PKI verifier. Its verdict and the presented
//! chain are recorded, so a probe can tell a certificate failure apart from
//! other handshake failures and still report the chain when verification is
//! skipped.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use doe_core::{ErrorCause, ScanError, TlsInfo};
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, CommonState, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::sync::{Arc, OnceLock};

fn root_store() -> Arc<RootCertStore> {
    static ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();
    ROOTS
        .get_or_init(|| {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(roots)
        })
        .clone()
}

#[derive(Debug, Default)]
struct OutcomeState {
    verified: bool,
    failure: Option<String>,
    chain: Vec<Vec<u8>>,
}

/// What the verifier saw during one handshake
#[derive(Debug, Default)]
pub struct VerificationOutcome {
    state: Mutex<OutcomeState>,
}

impl VerificationOutcome {
    fn record(&self, chain: Vec<Vec<u8>>, failure: Option<String>) {
        let mut state = self.state.lock();
        state.verified = failure.is_none();
        state.failure = failure;
        state.chain = chain;
    }

    /// Verification error, if the chain did not verify
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    /// DER chain presented by the server, leaf first
    #[must_use]
    pub fn chain(&self) -> Vec<Vec<u8>> {
        self.state.lock().chain.clone()
    }

    /// Verification-related fields of [`TlsInfo`]
    #[must_use]
    pub fn info(&self) -> TlsInfo {
        let state = self.state.lock();
        TlsInfo {
            certificate_valid: state.verified,
            certificate_error: state.failure.clone(),
            peer_certificates: state.chain.iter().map(|der| STANDARD.encode(der)).collect(),
            ..TlsInfo::default()
        }
    }
}

/// Web PKI verifier that records its verdict and optionally ignores it
#[derive(Debug)]
pub struct RecordingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    skip_verify: bool,
    outcome: Arc<VerificationOutcome>,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|c| c.as_ref().to_vec())
            .collect();
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => {
                self.outcome.record(chain, None);
                Ok(verified)
            }
            Err(err) => {
                self.outcome.record(chain, Some(err.to_string()));
                if self.skip_verify {
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(err)
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// A client configuration and the outcome slot its verifier writes to
#[derive(Debug, Clone)]
pub struct TlsSetup {
    /// rustls client configuration
    pub config: Arc<ClientConfig>,
    /// Verdict of the handshake made with `config`
    pub outcome: Arc<VerificationOutcome>,
    /// Verification failures are tolerated
    pub skip_verify: bool,
}

impl TlsSetup {
    /// Build a configuration offering `alpn`; QUIC requires `tls13_only`
    pub fn new(skip_verify: bool, alpn: &[&str], tls13_only: bool) -> Result<Self, ScanError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let inner = WebPkiServerVerifier::builder_with_provider(root_store(), provider.clone())
            .build()
            .map_err(|e| ScanError::query(ErrorCause::Session, e))?;
        let outcome = Arc::new(VerificationOutcome::default());
        let verifier = Arc::new(RecordingVerifier {
            inner,
            skip_verify,
            outcome: outcome.clone(),
        });

        let builder = ClientConfig::builder_with_provider(provider);
        let builder = if tls13_only {
            builder.with_protocol_versions(&[&rustls::version::TLS13])
        } else {
            builder.with_safe_default_protocol_versions()
        }
        .map_err(|e| ScanError::query(ErrorCause::Session, e))?;

        let mut config = builder
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

        Ok(Self {
            config: Arc::new(config),
            outcome,
            skip_verify,
        })
    }

    /// Classify a handshake or transport failure.
    ///
    /// It is a certificate error when the verifier rejected the chain and
    /// verification was enforced.
    #[track_caller]
    pub fn classify(&self, err: &dyn fmt::Display) -> ScanError {
        match self.outcome.failure() {
            Some(failure) if !self.skip_verify => {
                ScanError::certificate(failure).add_info(err.to_string())
            }
            _ => ScanError::query(ErrorCause::Session, err),
        }
    }

    /// Session properties after a successful handshake
    #[must_use]
    pub fn session_info(&self, common: &CommonState) -> TlsInfo {
        TlsInfo {
            version: common.protocol_version().map(|v| format!("{v:?}")),
            cipher_suite: common.negotiated_cipher_suite().map(|s| format!("{:?}", s.suite())),
            alpn: common
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            ..self.outcome.info()
        }
    }
}

/// Parse a server name for the handshake
pub fn server_name(name: &str) -> Result<ServerName<'static>, ScanError> {
    ServerName::try_from(name.to_string())
        .map_err(|e| ScanError::query_config(format!("invalid server name '{name}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use doe_core::ErrorKind;

    fn recording(setup: &TlsSetup) -> RecordingVerifier {
        RecordingVerifier {
            inner: WebPkiServerVerifier::builder_with_provider(
                root_store(),
                Arc::new(rustls::crypto::ring::default_provider()),
            )
            .build()
            .unwrap(),
            skip_verify: setup.skip_verify,
            outcome: setup.outcome.clone(),
        }
    }

    #[test]
    fn test_alpn_is_offered() {
        let setup = TlsSetup::new(false, &["doq", "dq"], true).unwrap();
        assert_eq!(setup.config.alpn_protocols, vec![b"doq".to_vec(), b"dq".to_vec()]);
    }

    #[test]
    fn test_bad_chain_recorded_and_rejected() {
        let setup = TlsSetup::new(false, &["dot"], false).unwrap();
        let verifier = recording(&setup);
        let cert = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00]);
        let name = server_name("dns.example").unwrap();
        let result = verifier.verify_server_cert(&cert, &[], &name, &[], UnixTime::now());
        assert!(result.is_err());
        assert!(setup.outcome.failure().is_some());
        assert_eq!(setup.outcome.chain().len(), 1);

        let err = setup.classify(&"handshake failed");
        assert_eq!(err.kind, ErrorKind::Certificate);
        assert!(!setup.outcome.info().certificate_valid);
    }

    #[test]
    fn test_bad_chain_tolerated_when_skipping() {
        let setup = TlsSetup::new(true, &["h2"], false).unwrap();
        let verifier = recording(&setup);
        let cert = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00]);
        let name = server_name("dns.example").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
        assert!(setup.outcome.failure().is_some());

        // a later transport failure is not a certificate error
        let err = setup.classify(&"connection reset");
        assert_eq!(err.kind, ErrorKind::Query);
        assert_eq!(err.cause, ErrorCause::Session);
    }

    #[test]
    fn test_handshake_failure_without_verdict() {
        let setup = TlsSetup::new(false, &[], false).unwrap();
        let err = setup.classify(&"connection refused");
        assert_eq!(err.kind, ErrorKind::Query);
        assert!(setup.outcome.chain().is_empty());
    }
}
