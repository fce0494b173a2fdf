//! User-facing alerts
//!
//! Each connection failure category maps to exactly one alert type, and no
//! alert is pushed without a corresponding app-state transition.

use tracing::warn;

/// Alerts surfaced to the user by the connection controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// Account flagged for billing issues; carries a deep link into
    /// account management
    DelinquentAccount { management_url: String },

    /// Credentials could not be read from the credential store
    CredentialUnavailable,

    /// Account has too many active sessions
    SessionLimitExceeded { active: u32, allowed: u32 },

    /// Tunnel remained stuck in the disconnecting state and recovery failed
    StuckConnection,

    /// No network transport available for a new connection
    NetworkUnreachable,

    /// Lower-level tunnel configuration could not be prepared
    ConfigurationPreparationFailed,

    /// A connection attempt exceeded its allotted time
    AttemptTimedOut,

    /// The tunnel reported a failure outside any connection attempt, so no
    /// root-cause analysis could explain it
    TunnelFailure { reason: String },
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::DelinquentAccount { management_url } => write!(
                f,
                "Your account has a billing issue. Manage it at {}",
                management_url
            ),
            Alert::CredentialUnavailable => {
                write!(f, "Cannot access your VPN credentials")
            }
            Alert::SessionLimitExceeded { active, allowed } => write!(
                f,
                "Too many active sessions: {} in use, {} allowed",
                active, allowed
            ),
            Alert::StuckConnection => {
                write!(f, "The VPN connection is stuck; please try again")
            }
            Alert::NetworkUnreachable => {
                write!(f, "No network connection available")
            }
            Alert::ConfigurationPreparationFailed => {
                write!(f, "Could not prepare the VPN configuration")
            }
            Alert::AttemptTimedOut => {
                write!(f, "The connection attempt timed out")
            }
            Alert::TunnelFailure { reason } => {
                write!(f, "The VPN connection failed: {}", reason)
            }
        }
    }
}

/// Sink consuming alerts produced by the connection controller
///
/// Fire-and-forget; no return value is consumed.
pub trait AlertSink: Send + Sync {
    fn push(&self, alert: Alert);
}

/// Default sink that records alerts in the log stream
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn push(&self, alert: Alert) {
        warn!(alert = ?alert, "{}", alert);
    }
}
