//! App-state change notification bus
//!
//! Publishes every app-state transition to subscribers in the order the
//! reconciler produced it. A broadcast channel is used rather than a watch
//! channel because watch coalesces intermediate values; observers here must
//! see every transition.

use crate::vpn::state::AppState;
use tokio::sync::broadcast;
use tracing::trace;

/// Default per-subscriber buffer. Slow observers that fall further behind
/// than this see a `Lagged` error rather than stalling the reconciler.
const CHANNEL_CAPACITY: usize = 64;

/// Order-preserving publisher of app-state changes
#[derive(Debug)]
pub struct StateNotifier {
    tx: broadcast::Sender<AppState>,
}

impl StateNotifier {
    /// Create a new notifier
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to app-state changes
    ///
    /// Each subscriber receives every state published after the point of
    /// subscription, in publication order.
    pub fn subscribe(&self) -> broadcast::Receiver<AppState> {
        self.tx.subscribe()
    }

    /// Publish a state change to all subscribers
    ///
    /// Publishing with no live subscribers is not an error.
    pub fn publish(&self, state: AppState) {
        trace!(state = %state, "publishing app state");
        let _ = self.tx.send(state);
    }
}

impl Default for StateNotifier {
    fn default() -> Self {
        Self::new()
    }
}
