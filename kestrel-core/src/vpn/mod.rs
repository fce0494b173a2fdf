//! VPN connection module
//!
//! Owns the app-facing connection state and the attempt lifecycle, built
//! around the tunnel provider's asynchronously pushed raw states.

pub mod controller;
pub mod provider;
pub mod state;

// Collaborators consumed by the controller
pub mod alert;
pub mod api;
pub mod credentials;
pub mod health;
pub mod notify;
pub mod prefs;
pub mod reachability;
pub mod timeout;

// Public re-exports
pub use alert::{Alert, AlertSink, LogAlertSink};
pub use controller::{Collaborators, ConnectionController, ControllerSettings};
pub use state::{AppState, TunnelState};
