//! Probe engines for classical and encrypted DNS.
//!
//! Every engine executes one query and returns a typed response or a
//! [`ScanError`](doe_core::ScanError). Engines validate their parameters
//! before any network I/O and never retry beyond the budget carried by the
//! query itself.
//!
//! - [`dns`]: UDP with truncation-driven TCP fallback and backoff
//! - [`dot`], [`doh`], [`doq`]: DNS over TLS, HTTPS (HTTP/1.1, HTTP/2,
//!   HTTP/3) and QUIC
//! - [`certificate`]: certificate chain harvesting
//! - [`ssh`]: SSH host key collection
//!
//! [`Probes`] bundles one engine per protocol behind the [`Probe`] trait so
//! callers can substitute their own.

pub mod certificate;
pub mod config;
pub mod dns;
pub mod doh;
pub mod doq;
pub mod dot;
mod http3;
#[cfg(test)]
mod loopback;
mod lookup;
pub mod net;
pub mod params;
mod probe;
mod quic;
pub mod ssh;
pub mod tls;

pub use certificate::CertificateProbe;
pub use config::{BackoffConfig, ProbeConfig};
pub use dns::{DnsProbe, DnsTransport, NetworkTransport};
pub use doh::DohProbe;
pub use doq::DoqProbe;
pub use dot::DotProbe;
pub use probe::Probe;
pub use ssh::SshProbe;

use doe_core::{
    CertificateQuery, CertificateResponse, DnsQuery, DnsResponse, DohQuery, DohResponse,
    DoqQuery, DoqResponse, DotQuery, DotResponse, PtrQuery, PtrResult, ResinfoQuery,
    ResinfoResult, SshQuery, SshResponse,
};
use std::sync::Arc;

/// A shared probe engine for queries of type `Q`
pub type DynProbe<Q, O> = Arc<dyn Probe<Q, Output = O>>;

/// One engine per protocol
#[derive(Clone)]
pub struct Probes {
    /// Classical DNS
    pub dns: DynProbe<DnsQuery, DnsResponse>,
    /// Reverse lookups
    pub ptr: DynProbe<PtrQuery, PtrResult>,
    /// Resolver information
    pub resinfo: DynProbe<ResinfoQuery, ResinfoResult>,
    /// DNS over TLS
    pub dot: DynProbe<DotQuery, DotResponse>,
    /// DNS over HTTPS
    pub doh: DynProbe<DohQuery, DohResponse>,
    /// DNS over QUIC
    pub doq: DynProbe<DoqQuery, DoqResponse>,
    /// Certificate harvesting
    pub certificate: DynProbe<CertificateQuery, CertificateResponse>,
    /// SSH host keys
    pub ssh: DynProbe<SshQuery, SshResponse>,
}

impl Probes {
    /// Engines on the real network
    #[must_use]
    pub fn network(config: &ProbeConfig) -> Self {
        Self::with_dns(DnsProbe::new(config), config)
    }

    /// Real encrypted engines over a custom classical DNS engine
    #[must_use]
    pub fn with_dns<T: DnsTransport + 'static>(dns: DnsProbe<T>, config: &ProbeConfig) -> Self {
        let dns = Arc::new(dns);
        Self {
            dns: dns.clone(),
            ptr: dns.clone(),
            resinfo: dns,
            dot: Arc::new(DotProbe::new(config)),
            doh: Arc::new(DohProbe::new(config)),
            doq: Arc::new(DoqProbe::new(config)),
            certificate: Arc::new(CertificateProbe::new(config)),
            ssh: Arc::new(SshProbe::new(config)),
        }
    }
}

impl std::fmt::Debug for Probes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probes").finish_non_exhaustive()
    }
}
