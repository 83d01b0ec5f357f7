//! Encrypted DNS and certificate scans.
//!
//! A scan whose certificate fails verification keeps the failure as its
//! result and is republished as a fresh child with verification disabled,
//! so the exchange itself is still measured.

use super::HandlerContext;
use doe_core::{
    CertificateScan, DohScan, DoqScan, DotScan, Endpoint, Scan, ScanError, ScanMetadata,
};

/// Recorded when the engine asks for a retry without explaining why
const UNVERIFIED_CERTIFICATE: &str = "certificate verification failed";

impl HandlerContext {
    pub(super) async fn handle_doh(&self, scan: &mut DohScan) {
        match self.probes.doh.run(&scan.query).await {
            Ok(response) => scan.result = Some(response),
            Err(e) => {
                let mut query = scan.query.clone();
                if let Some(retry) = retry_metadata(&mut scan.meta, e, &mut query.endpoint) {
                    self.escalate(&mut scan.meta, DohScan::new(retry, query).into())
                        .await;
                }
            }
        }
    }

    pub(super) async fn handle_dot(&self, scan: &mut DotScan) {
        match self.probes.dot.run(&scan.query).await {
            Ok(response) => scan.result = Some(response),
            Err(e) => {
                let mut query = scan.query.clone();
                if let Some(retry) = retry_metadata(&mut scan.meta, e, &mut query.endpoint) {
                    self.escalate(&mut scan.meta, DotScan::new(retry, query).into())
                        .await;
                }
            }
        }
    }

    pub(super) async fn handle_doq(&self, scan: &mut DoqScan) {
        match self.probes.doq.run(&scan.query).await {
            Ok(response) => scan.result = Some(response),
            Err(e) => {
                let mut query = scan.query.clone();
                if let Some(retry) = retry_metadata(&mut scan.meta, e, &mut query.endpoint) {
                    self.escalate(&mut scan.meta, DoqScan::new(retry, query).into())
                        .await;
                }
            }
        }
    }

    pub(super) async fn handle_certificate(&self, scan: &mut CertificateScan) {
        match self.probes.certificate.run(&scan.query).await {
            Ok(response) => {
                if response.retry_without_certificate_verification {
                    let reason = response
                        .tls
                        .certificate_error
                        .clone()
                        .unwrap_or_else(|| UNVERIFIED_CERTIFICATE.to_string());
                    let mut query = scan.query.clone();
                    let error = ScanError::certificate(reason);
                    if let Some(retry) = retry_metadata(&mut scan.meta, error, &mut query.endpoint) {
                        let retry: Scan = CertificateScan::new(retry, query).into();
                        self.escalate(&mut scan.meta, retry).await;
                    }
                }
                scan.result = Some(response);
            }
            Err(e) => {
                scan.meta.add_error(e);
            }
        }
    }
}

/// Record `error` and, if it is a certificate failure on a verifying
/// endpoint, switch `endpoint` to unverified mode and return the metadata of
/// the retry
fn retry_metadata(
    meta: &mut ScanMetadata,
    error: ScanError,
    endpoint: &mut Endpoint,
) -> Option<ScanMetadata> {
    let escalate = error.is_certificate_error() && !endpoint.skip_certificate_verify;
    meta.add_error(error);
    if !escalate {
        return None;
    }
    endpoint.skip_certificate_verify = true;
    Some(meta.child())
}
