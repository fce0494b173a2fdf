//! Connection-state reconciliation
//!
//! The controller owns the app-facing connection state. It derives `AppState`
//! from the tunnel provider's asynchronously pushed raw states plus a set of
//! intent flags, and it drives the outbound attempt lifecycle
//! (prepare, connect, cancel, disconnect).
//!
//! All state mutation is serialized through one mutex that is never held
//! across an await; suspension points (credential fetch, remote lookups,
//! provider calls) run outside the lock and re-enter it to apply results.

use crate::error::ConnectError;
use crate::types::{ConnectionDescriptor, Credentials};
use crate::vpn::alert::{Alert, AlertSink};
use crate::vpn::api::ApiService;
use crate::vpn::credentials::CredentialStore;
use crate::vpn::health::{HealthChecker, HealthMonitor};
use crate::vpn::notify::StateNotifier;
use crate::vpn::prefs::Preferences;
use crate::vpn::provider::{ConfigPreparer, TunnelProvider};
use crate::vpn::reachability::ReachabilityMonitor;
use crate::vpn::state::{AppState, TunnelState};
use crate::vpn::timeout::AttemptTimer;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default ceiling on how long a connection attempt may remain pending
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// External collaborators consumed by the controller
pub struct Collaborators {
    pub provider: Arc<dyn TunnelProvider>,
    pub credentials: Arc<dyn CredentialStore>,
    pub api: Arc<dyn ApiService>,
    pub alerts: Arc<dyn AlertSink>,
    pub reachability: Arc<dyn ReachabilityMonitor>,
    pub preparer: Arc<dyn ConfigPreparer>,
    pub prefs: Arc<dyn Preferences>,
}

/// Tunables for the controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// How long an attempt may stay pending before being aborted
    pub attempt_timeout: Duration,

    /// Endpoint probed while connected
    pub health_check_endpoint: String,

    /// Interval between health probes
    pub health_check_interval: Duration,

    /// Per-probe timeout
    pub health_check_timeout: Duration,

    /// Deep link into account management, surfaced on delinquency
    pub management_url: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            health_check_endpoint: "https://www.google.com".to_string(),
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(10),
            management_url: "https://account.example.com".to_string(),
        }
    }
}

/// Mutable controller state, guarded by a single mutex
struct ControllerState {
    app_state: AppState,

    /// Last raw state the provider reported, including the ones that do not
    /// surface app-facing changes
    last_tunnel_state: TunnelState,

    /// True from the start of a connect attempt until it resolves to
    /// Connected, Aborted, or Failed
    attempting_connection: bool,

    /// True while a Disconnecting tunnel state persists across a new
    /// connection attempt
    stuck_disconnecting: bool,

    /// True for at most one retry per stuck episode
    recovering_from_stuck_disconnect: bool,

    /// Descriptor of the last attempted connection, kept for retries
    last_descriptor: Option<ConnectionDescriptor>,

    attempt_timer: AttemptTimer,
    health_monitor: Option<HealthMonitor>,
}

/// Deferred work decided inside the reconcile lock and executed outside it
enum Followup {
    None,

    /// Run root-cause analysis on the given raw state
    Investigate(TunnelState),

    /// Run root-cause analysis, then force a disconnect
    InvestigateAndDisconnect(TunnelState),

    /// Surface an alert once the state lock is released
    RaiseAlert(Alert),
}

/// Single source of truth for the app-facing connection state
pub struct ConnectionController {
    state: Mutex<ControllerState>,
    notifier: StateNotifier,
    collaborators: Collaborators,
    settings: ControllerSettings,
    self_ref: Weak<ConnectionController>,
}

impl ConnectionController {
    /// Create a controller seeded from the provider's current state
    pub fn new(collaborators: Collaborators, settings: ControllerSettings) -> Arc<Self> {
        let initial_tunnel = collaborators.provider.current_state();
        let initial_app = match &initial_tunnel {
            TunnelState::Connecting(d) => AppState::Connecting(d.clone()),
            TunnelState::Connected(d) => AppState::Connected(d.clone()),
            TunnelState::Disconnecting(d) => AppState::Disconnecting(d.clone()),
            _ => AppState::Disconnected,
        };

        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(ControllerState {
                app_state: initial_app,
                last_tunnel_state: initial_tunnel,
                attempting_connection: false,
                stuck_disconnecting: false,
                recovering_from_stuck_disconnect: false,
                last_descriptor: None,
                attempt_timer: AttemptTimer::new(),
                health_monitor: None,
            }),
            notifier: StateNotifier::new(),
            collaborators,
            settings,
            self_ref: weak.clone(),
        })
    }

    /// Current app-facing state snapshot
    pub fn state(&self) -> AppState {
        self.state.lock().unwrap().app_state.clone()
    }

    /// Subscribe to app-state change notifications
    ///
    /// Notifications preserve the order in which transitions were produced.
    pub fn subscribe(&self) -> broadcast::Receiver<AppState> {
        self.notifier.subscribe()
    }

    /// Descriptor of the currently connected tunnel, if any
    pub fn active_connection(&self) -> Option<ConnectionDescriptor> {
        match self.state() {
            AppState::Connected(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    /// When the current connection was established, if connected
    pub fn connected_date(&self) -> Option<DateTime<Utc>> {
        if self.state().is_connected() {
            self.collaborators.prefs.last_connected()
        } else {
            None
        }
    }

    /// Re-derive the app state from the provider's current reported state
    pub fn refresh_state(&self) {
        self.reconcile(self.collaborators.provider.current_state());
    }

    /// Wake signal: the process resumed and may have missed state pushes
    pub fn wake(&self) {
        debug!("wake signal received");
        self.refresh_state();
    }

    /// Consume the provider's state pushes for the controller's lifetime
    pub fn run(self: &Arc<Self>) {
        let controller = Arc::downgrade(self);
        let mut changes = self.collaborators.provider.subscribe();
        tokio::spawn(async move {
            loop {
                let controller = match controller.upgrade() {
                    Some(controller) => controller,
                    None => break,
                };
                match changes.recv().await {
                    Ok(state) => controller.reconcile(state),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "state notifications lagged, resyncing");
                        controller.refresh_state();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Map one raw tunnel state onto the app-facing state
    ///
    /// Total over all raw state tags. Every branch that does not early-return
    /// publishes a notification, even when the value is unchanged.
    pub fn reconcile(&self, new_state: TunnelState) {
        debug!(tunnel_state = %new_state, "reconciling tunnel state");

        let followup = {
            let mut guard = self.state.lock().unwrap();

            // A stuck episode ends the instant the tunnel leaves Disconnecting
            if !new_state.is_disconnecting() {
                guard.stuck_disconnecting = false;
                guard.recovering_from_stuck_disconnect = false;
            }

            let previous_tunnel =
                std::mem::replace(&mut guard.last_tunnel_state, new_state.clone());

            match new_state {
                // Transient baseline and re-negotiation states are never
                // surfaced.
                TunnelState::Uninitialized | TunnelState::Reasserting => return,

                TunnelState::Disconnected => {
                    let next = if guard.attempting_connection {
                        AppState::PreparingConnection
                    } else {
                        AppState::Disconnected
                    };
                    self.transition(&mut guard, next);
                    Followup::None
                }

                TunnelState::Connecting(descriptor) => {
                    self.transition(&mut guard, AppState::Connecting(descriptor));
                    Followup::None
                }

                TunnelState::Connected(descriptor) => {
                    self.collaborators.prefs.set_intentional_disconnect(false);
                    self.collaborators.prefs.set_last_connected(Utc::now());
                    guard.attempting_connection = false;
                    guard.attempt_timer.cancel();
                    self.restart_health_monitor(&mut guard, &descriptor);
                    self.transition(&mut guard, AppState::Connected(descriptor));
                    Followup::None
                }

                TunnelState::Disconnecting(descriptor) => {
                    if guard.attempting_connection {
                        let aborted_mid_establishment =
                            matches!(guard.app_state, AppState::Connecting(_));
                        self.transition(&mut guard, AppState::PreparingConnection);
                        if aborted_mid_establishment {
                            // The tunnel gave up while establishing; find out
                            // why and force the teardown to finish.
                            guard.attempt_timer.cancel();
                            Followup::InvestigateAndDisconnect(TunnelState::Disconnecting(
                                descriptor,
                            ))
                        } else {
                            Followup::None
                        }
                    } else {
                        self.transition(&mut guard, AppState::Disconnecting(descriptor));
                        Followup::None
                    }
                }

                TunnelState::Failed(reason) => {
                    // A failure reported as the very first observation after
                    // the uninitialized baseline is a startup race, not a
                    // real failure.
                    if matches!(previous_tunnel, TunnelState::Uninitialized) {
                        debug!(%reason, "suppressing failure reported at startup");
                        return;
                    }
                    let investigate = guard.attempting_connection;
                    if investigate {
                        guard.attempt_timer.cancel();
                    }
                    self.transition(
                        &mut guard,
                        AppState::Failed(ConnectError::TunnelReportedFailure(reason.clone())),
                    );
                    if investigate {
                        Followup::Investigate(TunnelState::Failed(reason))
                    } else {
                        // No attempt to analyze; the raw failure is all the
                        // user gets.
                        Followup::RaiseAlert(Alert::TunnelFailure { reason })
                    }
                }
            }
        };

        match followup {
            Followup::None => {}
            Followup::Investigate(tunnel_state) => {
                if let Some(controller) = self.self_ref.upgrade() {
                    tokio::spawn(async move {
                        controller.investigate_failure(tunnel_state).await;
                    });
                }
            }
            Followup::InvestigateAndDisconnect(tunnel_state) => {
                if let Some(controller) = self.self_ref.upgrade() {
                    tokio::spawn(async move {
                        controller.investigate_failure(tunnel_state).await;
                        if let Err(e) = controller.collaborators.provider.disconnect().await {
                            warn!(error = %e, "forced disconnect failed");
                        }
                    });
                }
            }
            Followup::RaiseAlert(alert) => self.collaborators.alerts.push(alert),
        }
    }

    /// Apply and publish an app-state transition
    ///
    /// Leaving Connected stops the health monitor.
    fn transition(&self, guard: &mut ControllerState, next: AppState) {
        if !next.is_connected() {
            if let Some(monitor) = guard.health_monitor.take() {
                monitor.stop();
            }
        }
        debug!(app_state = %next, "app state transition");
        guard.app_state = next.clone();
        self.notifier.publish(next);
    }

    /// Replace the health monitor with one bound to the new connection
    fn restart_health_monitor(&self, guard: &mut ControllerState, descriptor: &ConnectionDescriptor) {
        if let Some(previous) = guard.health_monitor.take() {
            previous.stop();
        }
        match HealthChecker::new(
            self.settings.health_check_endpoint.clone(),
            self.settings.health_check_timeout,
        ) {
            Ok(checker) => {
                guard.health_monitor = Some(HealthMonitor::start(
                    checker,
                    self.settings.health_check_interval,
                    descriptor.clone(),
                ));
            }
            Err(e) => warn!(error = %e, "could not start health monitoring"),
        }
    }

    /// Resolve a failure locally: transition to Failed and push one alert
    fn fail(&self, error: ConnectError, alert: Alert) {
        {
            let mut guard = self.state.lock().unwrap();
            guard.attempting_connection = false;
            guard.attempt_timer.cancel();
            self.transition(&mut guard, AppState::Failed(error));
        }
        self.collaborators.alerts.push(alert);
    }

    /// Force the attempt into the aborted state
    fn abort_attempt(&self, user_initiated: bool) {
        let mut guard = self.state.lock().unwrap();
        guard.attempting_connection = false;
        guard.attempt_timer.cancel();
        self.transition(&mut guard, AppState::Aborted { user_initiated });
    }

    /// Surface a delinquent account, if flagged
    ///
    /// Returns true when the caller must stop the attempt.
    fn check_delinquency(&self, credentials: &Credentials) -> bool {
        if credentials.delinquent {
            info!("account is delinquent, blocking connection");
            self.fail(
                ConnectError::DelinquentAccount,
                Alert::DelinquentAccount {
                    management_url: self.settings.management_url.clone(),
                },
            );
            true
        } else {
            false
        }
    }

    /// Root-cause analysis after an attempt aborts
    ///
    /// Results of the remote lookups are discarded when a later event has
    /// superseded the analysis (app state no longer Disconnected).
    async fn investigate_failure(&self, tunnel_state: TunnelState) {
        let stuck = {
            let mut guard = self.state.lock().unwrap();
            if tunnel_state.is_disconnecting() && guard.stuck_disconnecting {
                true
            } else {
                guard.attempting_connection = false;
                false
            }
        };
        if stuck {
            self.recover_stuck_disconnect().await;
            return;
        }

        let known = match self.collaborators.credentials.fetch().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "credential fetch failed during investigation");
                self.fail(
                    ConnectError::CredentialUnavailable,
                    Alert::CredentialUnavailable,
                );
                return;
            }
        };

        if self.check_delinquency(&known) {
            return;
        }

        // Both lookups run to a terminal outcome; a failing one contributes
        // no data but never blocks the join.
        let (session_count, refreshed) = tokio::join!(
            self.collaborators.api.fetch_active_session_count(),
            self.collaborators.api.fetch_refreshed_credentials(),
        );
        let session_count = session_count
            .map_err(|e| debug!(error = %e, "session count lookup failed"))
            .ok();
        let refreshed = refreshed
            .map_err(|e| debug!(error = %e, "credential refresh lookup failed"))
            .ok();

        if !matches!(self.state(), AppState::Disconnected) {
            debug!("discarding stale investigation results");
            return;
        }

        let allowed = refreshed
            .as_ref()
            .map(|c| c.max_concurrent_sessions)
            .unwrap_or(known.max_concurrent_sessions);

        if let Some(active) = session_count {
            if active >= allowed {
                info!(active, allowed, "active session limit exceeded");
                self.fail(
                    ConnectError::SessionLimitExceeded { active, allowed },
                    Alert::SessionLimitExceeded { active, allowed },
                );
                return;
            }
        }

        if let Some(refreshed) = refreshed {
            if refreshed.secret != known.secret {
                info!("received refreshed credentials");
                if let Err(e) = self.collaborators.credentials.store(&refreshed).await {
                    warn!(error = %e, "could not persist refreshed credentials");
                }
                let descriptor = self.state.lock().unwrap().last_descriptor.clone();
                if let Some(descriptor) = descriptor {
                    if matches!(self.state(), AppState::Disconnected)
                        && !self.collaborators.provider.is_on_demand_enabled().await
                    {
                        info!("retrying connection with refreshed credentials");
                        // Boxed: the retry re-enters connect, which awaits
                        // this investigation inline on its own error path.
                        Box::pin(self.connect(descriptor)).await;
                    }
                }
            }
        }
    }

    /// Bounded recovery from a tunnel that will not finish disconnecting
    ///
    /// Removes the provider's lower-level configuration and retries at most
    /// once per stuck episode.
    async fn recover_stuck_disconnect(&self) {
        info!("recovering from stuck disconnect");
        match self.collaborators.provider.remove_configurations().await {
            Ok(()) => {
                let retry = {
                    let mut guard = self.state.lock().unwrap();
                    if guard.recovering_from_stuck_disconnect {
                        None
                    } else if let Some(descriptor) = guard.last_descriptor.clone() {
                        guard.recovering_from_stuck_disconnect = true;
                        Some(descriptor)
                    } else {
                        None
                    }
                };
                match retry {
                    Some(descriptor) => {
                        info!(server = %descriptor.server, "retrying after recovery");
                        // Boxed: connect can route back here through its
                        // inline failure investigation.
                        Box::pin(self.connect(descriptor)).await;
                    }
                    None => self.fail(ConnectError::StuckDisconnect, Alert::StuckConnection),
                }
            }
            Err(e) => {
                warn!(error = %e, "configuration removal failed");
                self.fail(ConnectError::StuckDisconnect, Alert::StuckConnection);
            }
        }
    }

    /// Prepare a new connection attempt
    ///
    /// Ensures a cached server certificate, clears legacy credential
    /// material, and starts the attempt countdown.
    pub async fn prepare_to_connect(&self) {
        let disconnecting = self
            .collaborators
            .provider
            .current_state()
            .is_disconnecting();

        // A tunnel already tearing down before the first connection ever
        // means leftover configuration from another install; recover instead
        // of attempting.
        if disconnecting && self.collaborators.prefs.last_connected().is_none() {
            self.recover_stuck_disconnect().await;
            return;
        }

        if let Err(e) = self.ensure_server_certificate().await {
            warn!(error = %e, "could not cache server certificate");
        }

        if self.collaborators.credentials.has_legacy_secret() {
            if let Err(e) = self.collaborators.credentials.clear_legacy_secret() {
                warn!(error = %e, "could not clear legacy secret");
            }
        }

        let mut guard = self.state.lock().unwrap();
        if disconnecting {
            guard.stuck_disconnecting = true;
        }
        self.transition(&mut guard, AppState::PreparingConnection);
        guard.attempting_connection = true;

        let weak = self.self_ref.clone();
        guard
            .attempt_timer
            .start(self.settings.attempt_timeout, move || async move {
                if let Some(controller) = weak.upgrade() {
                    controller.handle_attempt_timeout().await;
                }
            });
    }

    /// Connect to the given endpoint
    pub async fn connect(&self, descriptor: ConnectionDescriptor) {
        if matches!(self.state(), AppState::Aborted { .. }) {
            debug!("attempt was aborted, skipping connect");
            return;
        }

        if !self.collaborators.reachability.connection_available() {
            info!("no network transport available");
            self.fail(ConnectError::NetworkUnreachable, Alert::NetworkUnreachable);
            return;
        }

        let credentials = match self.collaborators.credentials.fetch().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "credential fetch failed");
                self.fail(
                    ConnectError::CredentialUnavailable,
                    Alert::CredentialUnavailable,
                );
                return;
            }
        };

        if self.check_delinquency(&credentials) {
            return;
        }

        {
            let mut guard = self.state.lock().unwrap();
            guard.last_descriptor = Some(descriptor.clone());
            guard.attempting_connection = true;
        }
        self.collaborators.prefs.set_last_descriptor(&descriptor);

        let settings = match self.collaborators.preparer.prepare(&descriptor) {
            Some(settings) => settings,
            None => {
                warn!(server = %descriptor.server, "configuration preparation failed");
                self.abort_attempt(false);
                self.collaborators.alerts.push(Alert::ConfigurationPreparationFailed);
                return;
            }
        };

        info!(server = %descriptor.server, protocol = %descriptor.protocol, "connecting");
        if let Err(e) = self.collaborators.provider.connect(settings).await {
            warn!(error = %e, "tunnel provider refused the connection");
            {
                let mut guard = self.state.lock().unwrap();
                guard.attempting_connection = false;
                guard.attempt_timer.cancel();
                self.transition(
                    &mut guard,
                    AppState::Failed(ConnectError::TunnelReportedFailure(e.to_string())),
                );
            }
            self.investigate_failure(TunnelState::Failed(e.to_string()))
                .await;
        }
    }

    /// Cancel the in-flight connection attempt on the user's behalf
    pub async fn cancel_connection_attempt(&self) {
        info!("connection attempt canceled by user");
        self.abort_attempt(true);
        if let Err(e) = self.collaborators.provider.disconnect().await {
            warn!(error = %e, "disconnect after cancel failed");
        }
    }

    /// Disconnect on the user's request
    pub async fn disconnect(&self) {
        info!("disconnecting");
        self.collaborators.prefs.set_intentional_disconnect(true);
        if let Err(e) = self.collaborators.provider.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
    }

    /// The attempt countdown elapsed without the tunnel coming up
    async fn handle_attempt_timeout(&self) {
        warn!("connection attempt timed out");
        let tunnel_state = self.collaborators.provider.current_state();
        self.abort_attempt(false);
        self.collaborators.alerts.push(Alert::AttemptTimedOut);
        self.investigate_failure(tunnel_state).await;
        if let Err(e) = self.collaborators.provider.disconnect().await {
            warn!(error = %e, "disconnect after timeout failed");
        }
    }

    /// Cache the server certificate if not already present
    async fn ensure_server_certificate(&self) -> crate::error::Result<()> {
        if self.collaborators.credentials.server_certificate().is_ok() {
            return Ok(());
        }
        debug!("fetching server certificate");
        let der = self.collaborators.api.fetch_server_certificate().await?;
        self.collaborators.credentials.store_server_certificate(&der)?;
        Ok(())
    }
}
