//! Network reachability monitoring
//!
//! New connection attempts are gated on a transport being available. The
//! production implementation watches NetworkManager state over D-Bus and
//! caches the latest answer so the gate itself never blocks.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use zbus::Connection;

/// How often the cached NetworkManager state is refreshed
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// NM_STATE_CONNECTED_GLOBAL
const NM_STATE_CONNECTED_GLOBAL: u32 = 70;

/// Gate reporting whether a network transport is currently available
pub trait ReachabilityMonitor: Send + Sync {
    fn connection_available(&self) -> bool;
}

/// Fixed-answer gate, used when no reachability source is available
/// and as a test double
pub struct StaticReachability(pub bool);

impl ReachabilityMonitor for StaticReachability {
    fn connection_available(&self) -> bool {
        self.0
    }
}

/// Errors that can occur during reachability monitoring
#[derive(Debug, thiserror::Error)]
pub enum ReachabilityError {
    #[error("D-Bus connection failed: {0}")]
    DBusConnectionFailed(#[from] zbus::Error),

    #[error("NetworkManager not available")]
    NetworkManagerUnavailable,

    #[error("Failed to query network state: {0}")]
    QueryFailed(String),
}

/// Reachability gate backed by NetworkManager via D-Bus
///
/// A background task keeps a cached availability flag fresh; reads never
/// touch the bus.
pub struct NetworkManagerReachability {
    available: watch::Receiver<bool>,
}

impl NetworkManagerReachability {
    /// Connect to the system bus and start the refresh task
    ///
    /// # Errors
    ///
    /// Returns `ReachabilityError` if the D-Bus connection fails or
    /// NetworkManager is not present on the bus.
    pub async fn connect() -> Result<Self, ReachabilityError> {
        let connection = Connection::system().await?;

        // Verify NetworkManager is available before trusting its answers
        let proxy = zbus::fdo::DBusProxy::new(&connection).await?;
        let bus_name = zbus::names::BusName::try_from("org.freedesktop.NetworkManager")
            .map_err(|e| ReachabilityError::QueryFailed(e.to_string()))?;
        let name_has_owner = proxy
            .name_has_owner(bus_name)
            .await
            .map_err(|e| ReachabilityError::QueryFailed(e.to_string()))?;

        if !name_has_owner {
            return Err(ReachabilityError::NetworkManagerUnavailable);
        }

        let initial = query_network_available(&connection).await?;
        let (tx, rx) = watch::channel(initial);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                if tx.is_closed() {
                    break;
                }
                match query_network_available(&connection).await {
                    Ok(available) => {
                        if *tx.borrow() != available {
                            debug!(available, "network reachability changed");
                        }
                        let _ = tx.send(available);
                    }
                    Err(e) => warn!(error = %e, "reachability query failed"),
                }
            }
        });

        Ok(Self { available: rx })
    }
}

impl ReachabilityMonitor for NetworkManagerReachability {
    fn connection_available(&self) -> bool {
        *self.available.borrow()
    }
}

/// Query the NetworkManager State property
async fn query_network_available(connection: &Connection) -> Result<bool, ReachabilityError> {
    let proxy = zbus::Proxy::new(
        connection,
        "org.freedesktop.NetworkManager",
        "/org/freedesktop/NetworkManager",
        "org.freedesktop.NetworkManager",
    )
    .await?;

    let state: u32 = proxy
        .get_property("State")
        .await
        .map_err(|e| ReachabilityError::QueryFailed(e.to_string()))?;

    Ok(state == NM_STATE_CONNECTED_GLOBAL)
}
