//! OpenConnect-backed tunnel provider
//!
//! Drives the OpenConnect CLI as the lower-level tunnel: spawns the process
//! in background mode, parses its output into tunnel state pushes, and
//! tears it down with SIGTERM/SIGKILL escalation.

use crate::error::ProviderError;
use crate::types::{ConnectionDescriptor, TunnelProtocol, TunnelSettings};
use crate::vpn::credentials::CredentialStore;
use crate::vpn::provider::TunnelProvider;
use crate::vpn::state::TunnelState;
use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Per-subscriber buffer for state pushes
const STATE_CHANNEL_CAPACITY: usize = 32;

/// Outcome of parsing one OpenConnect output line
#[derive(Debug, PartialEq, Eq)]
enum OutputEvent {
    /// Tunnel is up ("Configured as X.X.X.X, with SSL connected ...")
    Established,
    /// Authentication was rejected
    AuthFailed,
    /// Some other fatal condition
    Fatal(String),
    /// Nothing of interest
    Other,
}

/// Pattern-based parser for OpenConnect CLI output
struct OutputParser {
    established_pattern: Regex,
    auth_failed_pattern: Regex,
    fatal_pattern: Regex,
}

impl OutputParser {
    fn new() -> Self {
        Self {
            // Matches both "Connected tun0 as X.X.X.X" and "Configured as X.X.X.X"
            established_pattern: Regex::new(r"(?:Connected\s+\w+\s+as|Configured as)\s+\S+")
                .expect("Failed to compile established pattern"),
            auth_failed_pattern: Regex::new(r"Failed to authenticate")
                .expect("Failed to compile auth_failed pattern"),
            fatal_pattern: Regex::new(
                r"(?i)cannot resolve|unknown host|name resolution|verification failed|fgets \(stdin\)|failed to open tun",
            )
            .expect("Failed to compile fatal pattern"),
        }
    }

    fn parse_line(&self, line: &str) -> OutputEvent {
        if self.established_pattern.is_match(line) {
            return OutputEvent::Established;
        }
        if self.auth_failed_pattern.is_match(line) {
            return OutputEvent::AuthFailed;
        }
        if self.fatal_pattern.is_match(line) {
            return OutputEvent::Fatal(line.to_string());
        }
        OutputEvent::Other
    }
}

/// Tunnel provider backed by the OpenConnect CLI
pub struct OpenConnectProvider {
    state: Arc<Mutex<TunnelState>>,
    state_tx: broadcast::Sender<TunnelState>,
    pid: Arc<Mutex<Option<u32>>>,
    on_demand: AtomicBool,
    credentials: Arc<dyn CredentialStore>,
}

impl OpenConnectProvider {
    /// Create a provider pulling the session secret from the given store
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(TunnelState::Uninitialized)),
            state_tx,
            pid: Arc::new(Mutex::new(None)),
            on_demand: AtomicBool::new(false),
            credentials,
        }
    }

    fn push_state(
        state: &Mutex<TunnelState>,
        tx: &broadcast::Sender<TunnelState>,
        new_state: TunnelState,
    ) {
        debug!(state = %new_state, "tunnel state change");
        *state.lock().unwrap() = new_state.clone();
        let _ = tx.send(new_state);
    }

    fn set_state(&self, new_state: TunnelState) {
        Self::push_state(&self.state, &self.state_tx, new_state);
    }

    /// Find the daemonized OpenConnect process PID
    ///
    /// With --background the process daemonizes, so it has to be found by
    /// command line matching our server.
    async fn find_daemon_pid(server: &str) -> Option<u32> {
        for attempt in 0..15 {
            let output = Command::new("pgrep")
                .args(["-f", &format!("openconnect.*{}", server)])
                .output()
                .await;

            if let Ok(output) = output {
                if output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    for line in stdout.lines() {
                        if let Ok(pid) = line.trim().parse::<u32>() {
                            debug!(pid, server, "found OpenConnect daemon");
                            return Some(pid);
                        }
                    }
                }
            }

            if attempt < 14 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        warn!(server, "could not find OpenConnect daemon process");
        None
    }

    /// Terminate a process gracefully: SIGTERM, wait, then SIGKILL
    async fn terminate(pid: u32) -> Result<(), ProviderError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(pid as i32);

        // Already gone counts as terminated
        if kill(pid, None).is_err() {
            return Ok(());
        }

        kill(pid, Signal::SIGTERM)
            .map_err(|e| ProviderError::TerminationFailed(format!("SIGTERM failed: {}", e)))?;

        // Wait up to 5 seconds for graceful termination
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if kill(pid, None).is_err() {
                return Ok(());
            }
        }

        warn!(pid = pid.as_raw(), "graceful shutdown timed out, sending SIGKILL");
        kill(pid, Signal::SIGKILL)
            .map_err(|e| ProviderError::TerminationFailed(format!("SIGKILL failed: {}", e)))?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        if kill(pid, None).is_ok() {
            Err(ProviderError::TerminationFailed(format!(
                "process {} did not respond to signals",
                pid
            )))
        } else {
            Ok(())
        }
    }

    fn current_descriptor(&self) -> Option<ConnectionDescriptor> {
        match &*self.state.lock().unwrap() {
            TunnelState::Connecting(d)
            | TunnelState::Connected(d)
            | TunnelState::Disconnecting(d) => Some(d.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl TunnelProvider for OpenConnectProvider {
    fn current_state(&self) -> TunnelState {
        self.state.lock().unwrap().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TunnelState> {
        self.state_tx.subscribe()
    }

    async fn connect(&self, settings: TunnelSettings) -> Result<(), ProviderError> {
        which::which("openconnect")
            .map_err(|_| ProviderError::BinaryMissing("openconnect".to_string()))?;

        let secret = self
            .credentials
            .fetch()
            .await
            .map_err(|e| ProviderError::SpawnFailed(format!("credentials unavailable: {}", e)))?
            .secret;

        let descriptor = settings.descriptor.clone();
        self.set_state(TunnelState::Connecting(descriptor.clone()));

        // OpenConnect needs root for network configuration
        let mut cmd = Command::new("sudo");
        cmd.arg("openconnect")
            .arg("--protocol")
            .arg(descriptor.protocol.as_str())
            .arg("--user")
            .arg(&settings.username)
            .arg("--passwd-on-stdin")
            .arg("--background");

        if settings.no_dtls {
            cmd.arg("--no-dtls");
        }

        cmd.arg(format!("{}:{}", descriptor.server, descriptor.port))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            // The caller surfaces spawn failures; roll the state back so a
            // later attempt starts from a clean baseline.
            self.set_state(TunnelState::Disconnected);
            ProviderError::SpawnFailed(format!("Failed to spawn openconnect: {}", e))
        })?;

        info!(server = %descriptor.server, "spawned OpenConnect");

        if let Some(mut stdin) = child.stdin.take() {
            let written = async {
                stdin.write_all(secret.expose().as_bytes()).await?;
                stdin.write_all(b"\n").await
            }
            .await;
            if let Err(e) = written {
                self.set_state(TunnelState::Disconnected);
                return Err(ProviderError::SpawnFailed(format!("stdin write failed: {}", e)));
            }
        }

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                self.set_state(TunnelState::Disconnected);
                return Err(ProviderError::SpawnFailed(
                    "Failed to capture stdout".to_string(),
                ));
            }
        };

        // Establishment continues in the background; outcome is pushed as a
        // state change.
        let state = Arc::clone(&self.state);
        let state_tx = self.state_tx.clone();
        let pid_slot = Arc::clone(&self.pid);
        tokio::spawn(async move {
            let parser = OutputParser::new();
            let mut lines = BufReader::new(stdout).lines();
            let mut established = false;

            while let Ok(Some(line)) = lines.next_line().await {
                debug!("openconnect: {}", line);
                match parser.parse_line(&line) {
                    OutputEvent::Established => {
                        established = true;
                        break;
                    }
                    OutputEvent::AuthFailed => {
                        Self::push_state(
                            &state,
                            &state_tx,
                            TunnelState::Failed("authentication failed".to_string()),
                        );
                        return;
                    }
                    OutputEvent::Fatal(reason) => {
                        Self::push_state(&state, &state_tx, TunnelState::Failed(reason));
                        return;
                    }
                    OutputEvent::Other => {}
                }
            }

            if !established {
                Self::push_state(
                    &state,
                    &state_tx,
                    TunnelState::Failed("tunnel closed before establishment".to_string()),
                );
                return;
            }

            // The process daemonized; track the real PID for teardown
            *pid_slot.lock().unwrap() = Self::find_daemon_pid(&descriptor.server).await;
            drop(child);
            Self::push_state(&state, &state_tx, TunnelState::Connected(descriptor));
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProviderError> {
        if let Some(descriptor) = self.current_descriptor() {
            self.set_state(TunnelState::Disconnecting(descriptor));
        }

        let pid = self.pid.lock().unwrap().take();
        if let Some(pid) = pid {
            info!(pid, "terminating OpenConnect");
            Self::terminate(pid).await?;
        }

        self.set_state(TunnelState::Disconnected);
        Ok(())
    }

    async fn remove_configurations(&self) -> Result<(), ProviderError> {
        let output = Command::new("pgrep")
            .arg("openconnect")
            .output()
            .await
            .map_err(|e| ProviderError::RemovalFailed(format!("pgrep failed: {}", e)))?;

        if !output.status.success() {
            // No processes left to clean up
            return Ok(());
        }

        let pids = String::from_utf8_lossy(&output.stdout);
        for line in pids.lines() {
            if let Ok(pid) = line.trim().parse::<u32>() {
                Self::terminate(pid)
                    .await
                    .map_err(|e| ProviderError::RemovalFailed(e.to_string()))?;
            }
        }

        self.pid.lock().unwrap().take();
        Ok(())
    }

    async fn is_on_demand_enabled(&self) -> bool {
        self.on_demand.load(Ordering::SeqCst)
    }

    fn set_on_demand(&self, enabled: bool) {
        self.on_demand.store(enabled, Ordering::SeqCst);
    }

    fn current_protocol(&self) -> Option<TunnelProtocol> {
        self.current_descriptor().map(|d| d.protocol)
    }
}
