//! Single-shot connection attempt timer
//!
//! At most one countdown is ever live; starting a new one cancels the
//! previous one (replace semantics, not stack).

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cancelable single-shot countdown gating how long a connection attempt
/// may remain pending
#[derive(Debug)]
pub struct AttemptTimer {
    handle: Option<JoinHandle<()>>,
}

impl AttemptTimer {
    /// Create an idle timer
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Start the countdown, canceling any previous one
    ///
    /// `on_expiry` runs once if the countdown elapses without being
    /// canceled or replaced.
    pub fn start<F, Fut>(&mut self, duration: Duration, on_expiry: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.cancel();
        debug!(timeout_secs = duration.as_secs(), "starting attempt timer");
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_expiry().await;
        }));
    }

    /// Cancel the countdown if one is live
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("attempt timer canceled");
        }
    }

    /// Whether a countdown is currently live
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Default for AttemptTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AttemptTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
