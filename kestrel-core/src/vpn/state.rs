//! Connection state definitions
//!
//! Defines the two state spaces of the client: the raw tunnel state as
//! reported by the tunnel provider, and the app-facing state owned by the
//! connection controller.

use crate::error::ConnectError;
use crate::types::ConnectionDescriptor;

/// Raw tunnel state as reported by the tunnel provider
///
/// Opaque to the rest of the client except for its tag and payload. Every
/// tag maps to a defined app-state outcome in the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    /// Provider has not reported anything yet
    Uninitialized,

    /// No tunnel is up
    Disconnected,

    /// Tunnel establishment in progress
    Connecting(ConnectionDescriptor),

    /// Tunnel is up
    Connected(ConnectionDescriptor),

    /// Transient in-tunnel renegotiation, never surfaced to the app
    Reasserting,

    /// Tunnel teardown in progress
    Disconnecting(ConnectionDescriptor),

    /// Tunnel reported a failure
    Failed(String),
}

impl TunnelState {
    /// Whether the tunnel is currently tearing down
    pub fn is_disconnecting(&self) -> bool {
        matches!(self, TunnelState::Disconnecting(_))
    }
}

impl std::fmt::Display for TunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelState::Uninitialized => write!(f, "uninitialized"),
            TunnelState::Disconnected => write!(f, "disconnected"),
            TunnelState::Connecting(d) => write!(f, "connecting to {}", d),
            TunnelState::Connected(d) => write!(f, "connected to {}", d),
            TunnelState::Reasserting => write!(f, "reasserting"),
            TunnelState::Disconnecting(d) => write!(f, "disconnecting from {}", d),
            TunnelState::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// App-facing connection state
///
/// Owned exclusively by the connection controller. Exactly one value is
/// current at any instant, and every transition is published exactly once
/// through the notification bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    /// Not connected
    Disconnected,

    /// A connection attempt is being set up
    PreparingConnection,

    /// Tunnel establishment in progress
    Connecting(ConnectionDescriptor),

    /// Successfully connected
    Connected(ConnectionDescriptor),

    /// Tunnel teardown in progress
    Disconnecting(ConnectionDescriptor),

    /// A connection attempt was aborted before completing
    Aborted {
        /// Whether the user requested the abort
        user_initiated: bool,
    },

    /// Connection failed
    Failed(ConnectError),
}

impl AppState {
    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        matches!(self, AppState::Connected(_))
    }

    /// Check if in a failure state
    pub fn is_failed(&self) -> bool {
        matches!(self, AppState::Failed(_))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppState::Disconnected => write!(f, "disconnected"),
            AppState::PreparingConnection => write!(f, "preparing connection"),
            AppState::Connecting(d) => write!(f, "connecting to {}", d),
            AppState::Connected(d) => write!(f, "connected to {}", d),
            AppState::Disconnecting(d) => write!(f, "disconnecting from {}", d),
            AppState::Aborted { user_initiated } => {
                if *user_initiated {
                    write!(f, "canceled")
                } else {
                    write!(f, "aborted")
                }
            }
            AppState::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}
