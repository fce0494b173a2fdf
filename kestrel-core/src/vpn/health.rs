//! Connection health checking via HTTP/HTTPS
//!
//! Provides `HealthChecker` for probing connectivity through the tunnel and
//! `HealthMonitor`, a periodic background task bound to a single live
//! connection. The connection controller replaces the monitor (stop, then
//! start) on every Connected transition and stops it on every non-Connected
//! transition.

use crate::types::ConnectionDescriptor;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Result of a single health check probe
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    success: bool,
    duration: Duration,
    error: Option<String>,
}

impl HealthCheckResult {
    fn success(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            error: None,
        }
    }

    fn failure(duration: Duration, error: String) -> Self {
        Self {
            success: false,
            duration,
            error: Some(error),
        }
    }

    /// Check if the probe was successful
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Get the duration of the probe
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Get the error message if the probe failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Errors that can occur while setting up health checking
#[derive(Debug, thiserror::Error)]
pub enum HealthCheckError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client creation failed: {0}")]
    ClientCreationFailed(#[from] reqwest::Error),
}

/// Performs HTTP/HTTPS probes to verify connectivity through the tunnel
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HealthChecker {
    /// Create a new health checker
    ///
    /// `endpoint` must be an HTTP or HTTPS URL; `timeout` bounds each probe.
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, HealthCheckError> {
        let url = Url::parse(&endpoint)
            .map_err(|e| HealthCheckError::InvalidUrl(format!("Failed to parse URL: {}", e)))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(HealthCheckError::InvalidUrl(format!(
                    "Only HTTP/HTTPS schemes are supported, got: {}",
                    scheme
                )));
            }
        }

        let client = Client::builder().timeout(timeout).use_rustls_tls().build()?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Perform one probe
    ///
    /// Successful if the endpoint responds within the timeout with a 2xx or
    /// 3xx status.
    pub async fn check(&self) -> HealthCheckResult {
        let start = Instant::now();

        match self.client.get(&self.endpoint).send().await {
            Ok(response) => {
                let duration = start.elapsed();
                let status = response.status();

                if status.is_success() || status.is_redirection() {
                    debug!(
                        endpoint = %self.endpoint,
                        status = %status,
                        duration_ms = duration.as_millis(),
                        "Health check succeeded"
                    );
                    HealthCheckResult::success(duration)
                } else {
                    warn!(
                        endpoint = %self.endpoint,
                        status = %status,
                        "Health check failed with error status"
                    );
                    HealthCheckResult::failure(duration, format!("Unhealthy status code: {}", status))
                }
            }
            Err(e) => {
                let duration = start.elapsed();
                let error_msg = if e.is_timeout() {
                    format!("Request timeout after {:?}", self.timeout)
                } else if e.is_connect() {
                    "Connection refused or unreachable".to_string()
                } else {
                    format!("Request failed: {}", e)
                };

                warn!(
                    endpoint = %self.endpoint,
                    error = %error_msg,
                    "Health check failed"
                );

                HealthCheckResult::failure(duration, error_msg)
            }
        }
    }
}

/// Periodic health checking bound to one live connection
///
/// Exclusively owned by the connection controller; dropping or stopping
/// the monitor aborts the background task.
#[derive(Debug)]
pub struct HealthMonitor {
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start monitoring the given connection
    pub fn start(
        checker: HealthChecker,
        interval: Duration,
        descriptor: ConnectionDescriptor,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // Consume first immediate tick

            let mut consecutive_failures = 0u32;
            loop {
                ticker.tick().await;
                let result = checker.check().await;

                if result.is_success() {
                    if consecutive_failures > 0 {
                        debug!(
                            server = %descriptor.server,
                            "Health check recovered after {} failures",
                            consecutive_failures
                        );
                    }
                    consecutive_failures = 0;
                } else {
                    consecutive_failures += 1;
                    warn!(
                        server = %descriptor.server,
                        failures = consecutive_failures,
                        error = result.error().unwrap_or("unknown"),
                        "Health check failed"
                    );
                }
            }
        });

        Self { task }
    }

    /// Stop monitoring and discard the task
    pub fn stop(self) {
        self.task.abort();
        debug!("health monitor stopped");
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
