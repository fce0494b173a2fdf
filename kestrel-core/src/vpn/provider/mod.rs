//! Tunnel provider seam
//!
//! The tunnel provider is the subsystem that actually establishes and tears
//! down the encrypted tunnel. The connection controller treats it as an
//! external collaborator: it consumes the provider's asynchronously pushed
//! state changes and drives intent (connect/disconnect/remove) through this
//! trait.

pub mod openconnect;

use crate::error::ProviderError;
use crate::types::{ConnectionDescriptor, TunnelProtocol, TunnelSettings};
use crate::vpn::state::TunnelState;
use async_trait::async_trait;
use tokio::sync::broadcast;

pub use openconnect::OpenConnectProvider;

/// Subsystem establishing and reporting status of the encrypted tunnel
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// The provider's current reported state
    fn current_state(&self) -> TunnelState;

    /// Subscribe to asynchronously pushed state changes
    fn subscribe(&self) -> broadcast::Receiver<TunnelState>;

    /// Establish a tunnel using a prepared lower-level configuration
    async fn connect(&self, settings: TunnelSettings) -> Result<(), ProviderError>;

    /// Tear down the tunnel
    async fn disconnect(&self) -> Result<(), ProviderError>;

    /// Remove the provider's lower-level configurations
    ///
    /// Used by stuck-disconnect recovery when teardown has wedged.
    async fn remove_configurations(&self) -> Result<(), ProviderError>;

    /// Whether automatic reconnect-on-demand is active
    async fn is_on_demand_enabled(&self) -> bool;

    /// Enable or disable automatic reconnect-on-demand
    fn set_on_demand(&self, enabled: bool);

    /// Protocol of the current tunnel, if any
    fn current_protocol(&self) -> Option<TunnelProtocol>;
}

/// Derives a lower-level tunnel configuration from a connection descriptor
///
/// `None` signals preparation failure; the attempt is aborted.
pub trait ConfigPreparer: Send + Sync {
    fn prepare(&self, descriptor: &ConnectionDescriptor) -> Option<TunnelSettings>;
}

/// Preparer validating the descriptor against basic endpoint rules before
/// binding it to the configured account
pub struct ProfilePreparer {
    username: String,
    no_dtls: bool,
}

impl ProfilePreparer {
    /// Create a preparer for the given account
    pub fn new(username: String, no_dtls: bool) -> Self {
        Self { username, no_dtls }
    }
}

impl ConfigPreparer for ProfilePreparer {
    fn prepare(&self, descriptor: &ConnectionDescriptor) -> Option<TunnelSettings> {
        if descriptor.server.is_empty() || descriptor.port == 0 {
            return None;
        }
        // Basic hostname validation
        if !descriptor
            .server
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
        {
            return None;
        }
        if self.username.is_empty() {
            return None;
        }

        Some(TunnelSettings {
            descriptor: descriptor.clone(),
            username: self.username.clone(),
            no_dtls: self.no_dtls,
        })
    }
}
