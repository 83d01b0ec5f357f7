//! Address ranges that must never be probed.

use ipnet::IpNet;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default blocklist path
pub const DEFAULT_PATH: &str = "blocklist.conf";

/// Immutable set of blocked networks
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    ranges: Vec<IpNet>,
}

impl Blocklist {
    /// Parse one CIDR (or bare address) per line.
    ///
    /// Blank lines, `#` comments and malformed entries are skipped.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let ranges = content
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let parsed = line
                    .parse::<IpNet>()
                    .ok()
                    .or_else(|| line.parse::<IpAddr>().ok().map(IpNet::from));
                if parsed.is_none() {
                    debug!(entry = line, "skipping malformed blocklist entry");
                }
                parsed
            })
            .collect();
        Self { ranges }
    }

    /// Load from `path`; a missing file yields an empty list
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "blocklist not found, nothing is blocked");
            return Ok(Self::default());
        }
        let list = Self::parse(&std::fs::read_to_string(path)?);
        info!(path = %path.display(), ranges = list.len(), "blocklist loaded");
        Ok(list)
    }

    /// Returns true if `addr` lies in a blocked range
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.ranges.iter().any(|net| net.contains(&addr))
    }

    /// Returns true if `host` is an address in a blocked range.
    ///
    /// Names are never blocked here; their resolved addresses are checked
    /// by whoever dials them.
    #[must_use]
    pub fn contains_host(&self, host: &str) -> bool {
        host.trim()
            .parse::<IpAddr>()
            .is_ok_and(|addr| self.contains(addr))
    }

    /// Number of ranges
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns true if nothing is blocked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
