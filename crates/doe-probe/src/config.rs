//! Settings shared by every probe engine.

use std::net::IpAddr;
use std::time::Duration;

/// Backoff between retries of a single exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffConfig {
    /// Create a backoff starting at 100ms
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
        }
    }

    /// Set initial backoff duration
    #[must_use]
    pub const fn initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    /// Delay before retry number `retry` (1-based), capped at `max_backoff`.
    ///
    /// Retry 0 is the first attempt and never waits; a zero cap disables
    /// backoff entirely.
    #[must_use]
    pub fn backoff_for(&self, retry: u32, max_backoff: Duration) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.initial_backoff.saturating_mul(factor).min(max_backoff)
    }
}

/// Probe configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Source address for every outbound socket
    pub local_address: Option<IpAddr>,

    /// Backoff between DNS retries
    pub backoff: BackoffConfig,
}

impl ProbeConfig {
    /// Create a configuration with the system-chosen source address
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind outbound sockets to `address`
    #[must_use]
    pub const fn local_address(mut self, address: Option<IpAddr>) -> Self {
        self.local_address = address;
        self
    }

    /// Set the retry backoff
    #[must_use]
    pub const fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = BackoffConfig::new();
        let cap = Duration::from_millis(350);
        assert_eq!(backoff.backoff_for(0, cap), Duration::ZERO);
        assert_eq!(backoff.backoff_for(1, cap), Duration::from_millis(100));
        assert_eq!(backoff.backoff_for(2, cap), Duration::from_millis(200));
        assert_eq!(backoff.backoff_for(3, cap), cap);
        assert_eq!(backoff.backoff_for(40, cap), cap);
    }

    #[test]
    fn test_zero_cap_disables_backoff() {
        let backoff = BackoffConfig::new();
        assert_eq!(backoff.backoff_for(3, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_builder() {
        let config = ProbeConfig::new()
            .local_address(Some("192.0.2.10".parse().unwrap()))
            .backoff(BackoffConfig::new().initial_backoff(Duration::from_millis(5)));
        assert!(config.local_address.is_some());
        assert_eq!(config.backoff.initial_backoff, Duration::from_millis(5));
    }
}
