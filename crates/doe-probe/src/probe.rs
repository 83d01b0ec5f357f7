//! The seam between scan handlers and protocol engines.

use async_trait::async_trait;
use doe_core::ScanError;

/// Executes one query of type `Q`.
///
/// Engines are stateless between calls; every failure is returned as a
/// taxonomized [`ScanError`] so handlers can attach it to the envelope.
#[async_trait]
pub trait Probe<Q: Sync>: Send + Sync {
    /// Typed result of a successful probe
    type Output: Send;

    /// Run the probe
    async fn run(&self, query: &Q) -> Result<Self::Output, ScanError>;
}
