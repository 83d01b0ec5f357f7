//! SSH host key collection.

use crate::types::millis;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;
/// Default SSH probe timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// An SSH query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshQuery {
    /// Server name or address
    pub host: String,

    /// Address to dial instead of resolving `host`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,

    /// Server port
    pub port: u16,

    /// Handshake timeout (zero disables the timeout)
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl SshQuery {
    /// Query port 22 of `host`
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ip: None,
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// An SSH response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshResponse {
    /// The server completed key exchange
    pub ssh_enabled: bool,

    /// The server accepted the `none` authentication method
    pub open_ssh_server: bool,

    /// Host key algorithm, e.g. `ssh-ed25519`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key_type: Option<String>,

    /// Host key in OpenSSH base64 encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key: Option<String>,
}
