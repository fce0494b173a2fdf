//! Type definitions and wrappers for secure data handling
//!
//! This module provides type-safe wrappers for sensitive data using the
//! secrecy crate to prevent accidental exposure in logs or debug output.

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

/// Wrapper for the session secret used to authenticate with the VPN
///
/// This type ensures the secret is never accidentally logged or exposed
/// in debug output, maintaining security throughout the application.
#[derive(Clone, Debug)]
pub struct SessionSecret(Secret<String>);

impl SessionSecret {
    /// Create a new SessionSecret
    pub fn new(secret: String) -> Self {
        Self(Secret::new(secret))
    }

    /// Expose the secret value (use with caution!)
    ///
    /// This should only be called when handing the secret to the tunnel
    /// process or writing it to the credential store.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for SessionSecret {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl PartialEq for SessionSecret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for SessionSecret {}

/// Account credentials fetched from and written back to the credential store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Maximum number of concurrent sessions the account allows
    pub max_concurrent_sessions: u32,

    /// Whether the account is flagged for billing issues
    pub delinquent: bool,

    /// Secret used to authenticate new tunnel sessions
    pub secret: SessionSecret,
}

impl Credentials {
    /// Create new credentials
    pub fn new(max_concurrent_sessions: u32, delinquent: bool, secret: SessionSecret) -> Self {
        Self {
            max_concurrent_sessions,
            delinquent,
            secret,
        }
    }
}

/// Tunnel protocols supported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProtocol {
    /// Cisco AnyConnect compatible
    Anyconnect,
    /// F5 BIG-IP
    F5,
    /// Palo Alto GlobalProtect
    Gp,
}

impl TunnelProtocol {
    /// Protocol name as passed to the tunnel binary
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelProtocol::Anyconnect => "anyconnect",
            TunnelProtocol::F5 => "f5",
            TunnelProtocol::Gp => "gp",
        }
    }
}

impl Default for TunnelProtocol {
    fn default() -> Self {
        Self::Anyconnect
    }
}

impl std::fmt::Display for TunnelProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of the desired endpoint and protocol for one
/// connection attempt
///
/// Owned by the caller; the connection controller retains only the last
/// attempted descriptor, for retry purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// VPN server hostname or IP address
    pub server: String,

    /// VPN server port
    pub port: u16,

    /// Tunnel protocol to negotiate
    pub protocol: TunnelProtocol,
}

impl ConnectionDescriptor {
    /// Create a new connection descriptor
    pub fn new(server: String, port: u16, protocol: TunnelProtocol) -> Self {
        Self {
            server,
            port,
            protocol,
        }
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.server, self.port, self.protocol)
    }
}

/// Lower-level tunnel configuration handed to the tunnel provider
///
/// Produced by a `ConfigPreparer` from a `ConnectionDescriptor`. The
/// session secret is deliberately not part of this record; the provider
/// pulls it from the credential store at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    /// Endpoint and protocol for this attempt
    pub descriptor: ConnectionDescriptor,

    /// Username for tunnel authentication
    pub username: String,

    /// Disable DTLS negotiation
    pub no_dtls: bool,
}
