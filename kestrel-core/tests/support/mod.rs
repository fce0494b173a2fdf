//! Shared test doubles for controller integration tests
//!
//! Every collaborator the controller consumes has a configurable in-memory
//! mock here; mocks use interior mutability so tests can adjust behavior
//! after the controller is built.

// Not every test binary uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kestrel_core::error::{ApiError, CredentialError, ProviderError};
use kestrel_core::types::{
    ConnectionDescriptor, Credentials, SessionSecret, TunnelProtocol, TunnelSettings,
};
use kestrel_core::vpn::alert::{Alert, AlertSink};
use kestrel_core::vpn::api::ApiService;
use kestrel_core::vpn::credentials::CredentialStore;
use kestrel_core::vpn::prefs::Preferences;
use kestrel_core::vpn::provider::{ConfigPreparer, TunnelProvider};
use kestrel_core::vpn::reachability::ReachabilityMonitor;
use kestrel_core::vpn::state::TunnelState;
use kestrel_core::vpn::{Collaborators, ConnectionController, ControllerSettings};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};

pub fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor {
        server: "vpn.example.com".to_string(),
        port: 443,
        protocol: TunnelProtocol::Anyconnect,
    }
}

pub fn credentials(secret: &str) -> Credentials {
    Credentials::new(5, false, SessionSecret::new(secret.to_string()))
}

/// Yield until spawned controller tasks have settled
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Tunnel provider double recording calls and replaying pushed states
pub struct MockTunnelProvider {
    state: Mutex<TunnelState>,
    state_tx: broadcast::Sender<TunnelState>,
    pub connect_calls: Mutex<Vec<TunnelSettings>>,
    pub disconnect_calls: AtomicU32,
    pub remove_calls: AtomicU32,
    pub fail_connect: AtomicBool,
    pub fail_remove: AtomicBool,
    pub on_demand: AtomicBool,
}

impl MockTunnelProvider {
    pub fn new(initial: TunnelState) -> Arc<Self> {
        let (state_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(initial),
            state_tx,
            connect_calls: Mutex::new(Vec::new()),
            disconnect_calls: AtomicU32::new(0),
            remove_calls: AtomicU32::new(0),
            fail_connect: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            on_demand: AtomicBool::new(false),
        })
    }

    /// Update the reported state and push the change to subscribers
    pub fn push_state(&self, state: TunnelState) {
        *self.state.lock().unwrap() = state.clone();
        let _ = self.state_tx.send(state);
    }

    /// Update the reported state without notifying subscribers
    pub fn set_state(&self, state: TunnelState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TunnelProvider for MockTunnelProvider {
    fn current_state(&self) -> TunnelState {
        self.state.lock().unwrap().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TunnelState> {
        self.state_tx.subscribe()
    }

    async fn connect(&self, settings: TunnelSettings) -> Result<(), ProviderError> {
        self.connect_calls.lock().unwrap().push(settings);
        if self.fail_connect.load(Ordering::SeqCst) {
            Err(ProviderError::SpawnFailed("mock refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn disconnect(&self) -> Result<(), ProviderError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_configurations(&self) -> Result<(), ProviderError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_remove.load(Ordering::SeqCst) {
            Err(ProviderError::RemovalFailed("mock refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn is_on_demand_enabled(&self) -> bool {
        self.on_demand.load(Ordering::SeqCst)
    }

    fn set_on_demand(&self, enabled: bool) {
        self.on_demand.store(enabled, Ordering::SeqCst);
    }

    fn current_protocol(&self) -> Option<TunnelProtocol> {
        None
    }
}

/// In-memory credential store
pub struct MockCredentialStore {
    pub stored: Mutex<Option<Credentials>>,
    pub store_calls: AtomicU32,
    pub legacy_secret: AtomicBool,
    pub certificate: Mutex<Option<Vec<u8>>>,
}

impl MockCredentialStore {
    pub fn with_credentials(credentials: Credentials) -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(Some(credentials)),
            store_calls: AtomicU32::new(0),
            legacy_secret: AtomicBool::new(false),
            certificate: Mutex::new(Some(vec![1, 2, 3])),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(None),
            store_calls: AtomicU32::new(0),
            legacy_secret: AtomicBool::new(false),
            certificate: Mutex::new(None),
        })
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn fetch(&self) -> Result<Credentials, CredentialError> {
        self.stored
            .lock()
            .unwrap()
            .clone()
            .ok_or(CredentialError::NotFound)
    }

    async fn store(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        *self.stored.lock().unwrap() = Some(credentials.clone());
        Ok(())
    }

    fn has_legacy_secret(&self) -> bool {
        self.legacy_secret.load(Ordering::SeqCst)
    }

    fn clear_legacy_secret(&self) -> Result<(), CredentialError> {
        self.legacy_secret.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn server_certificate(&self) -> Result<Vec<u8>, CredentialError> {
        self.certificate
            .lock()
            .unwrap()
            .clone()
            .ok_or(CredentialError::CertificateMissing)
    }

    fn store_server_certificate(&self, der: &[u8]) -> Result<(), CredentialError> {
        *self.certificate.lock().unwrap() = Some(der.to_vec());
        Ok(())
    }
}

/// Account API double with an optional gate delaying lookup completion
///
/// The gate lets a test hold the dual lookup open while it drives other
/// state transitions, then release it deterministically.
pub struct MockApiService {
    pub session_count: Mutex<Result<u32, ApiError>>,
    pub refreshed: Mutex<Result<Credentials, ApiError>>,
    pub certificate: Mutex<Result<Vec<u8>, ApiError>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

impl MockApiService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            session_count: Mutex::new(Ok(1)),
            refreshed: Mutex::new(Ok(credentials("secret"))),
            certificate: Mutex::new(Ok(vec![1, 2, 3])),
            gate: Mutex::new(None),
        })
    }

    /// Hold lookups open until the returned release handle is used
    pub fn gated(self: &Arc<Self>) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    async fn wait_for_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ApiService for MockApiService {
    async fn fetch_active_session_count(&self) -> Result<u32, ApiError> {
        self.wait_for_gate().await;
        self.session_count.lock().unwrap().clone()
    }

    async fn fetch_refreshed_credentials(&self) -> Result<Credentials, ApiError> {
        self.wait_for_gate().await;
        self.refreshed.lock().unwrap().clone()
    }

    async fn fetch_server_certificate(&self) -> Result<Vec<u8>, ApiError> {
        self.certificate.lock().unwrap().clone()
    }
}

/// Alert sink recording every pushed alert
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alerts: Mutex::new(Vec::new()),
        })
    }

    pub fn recorded(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn push(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

/// In-memory preferences
pub struct MemoryPreferences {
    intentional_disconnect: AtomicBool,
    last_connected: Mutex<Option<DateTime<Utc>>>,
    descriptors: Mutex<BTreeMap<String, ConnectionDescriptor>>,
}

impl MemoryPreferences {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            intentional_disconnect: AtomicBool::new(false),
            last_connected: Mutex::new(None),
            descriptors: Mutex::new(BTreeMap::new()),
        })
    }
}

impl Preferences for MemoryPreferences {
    fn intentional_disconnect(&self) -> bool {
        self.intentional_disconnect.load(Ordering::SeqCst)
    }

    fn set_intentional_disconnect(&self, value: bool) {
        self.intentional_disconnect.store(value, Ordering::SeqCst);
    }

    fn last_connected(&self) -> Option<DateTime<Utc>> {
        *self.last_connected.lock().unwrap()
    }

    fn set_last_connected(&self, when: DateTime<Utc>) {
        *self.last_connected.lock().unwrap() = Some(when);
    }

    fn last_descriptor(&self, protocol: TunnelProtocol) -> Option<ConnectionDescriptor> {
        self.descriptors
            .lock()
            .unwrap()
            .get(protocol.as_str())
            .cloned()
    }

    fn set_last_descriptor(&self, descriptor: &ConnectionDescriptor) {
        self.descriptors
            .lock()
            .unwrap()
            .insert(descriptor.protocol.as_str().to_string(), descriptor.clone());
    }
}

/// Reachability double, flippable mid-test
pub struct MockReachability {
    pub available: AtomicBool,
}

impl MockReachability {
    pub fn reachable() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
        })
    }
}

impl ReachabilityMonitor for MockReachability {
    fn connection_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Config preparer double, failable mid-test
pub struct MockPreparer {
    pub fail: AtomicBool,
}

impl MockPreparer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
        })
    }
}

impl ConfigPreparer for MockPreparer {
    fn prepare(&self, descriptor: &ConnectionDescriptor) -> Option<TunnelSettings> {
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        Some(TunnelSettings {
            descriptor: descriptor.clone(),
            username: "testuser".to_string(),
            no_dtls: false,
        })
    }
}

/// Controller wired to the full set of mocks
pub struct TestHarness {
    pub controller: Arc<ConnectionController>,
    pub provider: Arc<MockTunnelProvider>,
    pub credentials: Arc<MockCredentialStore>,
    pub api: Arc<MockApiService>,
    pub alerts: Arc<RecordingAlertSink>,
    pub reachability: Arc<MockReachability>,
    pub preparer: Arc<MockPreparer>,
    pub prefs: Arc<MemoryPreferences>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_initial_state(TunnelState::Uninitialized)
    }

    pub fn with_initial_state(initial: TunnelState) -> Self {
        let provider = MockTunnelProvider::new(initial);
        let credentials = MockCredentialStore::with_credentials(credentials("secret"));
        let api = MockApiService::new();
        let alerts = RecordingAlertSink::new();
        let reachability = MockReachability::reachable();
        let preparer = MockPreparer::new();
        let prefs = MemoryPreferences::new();

        let controller = ConnectionController::new(
            Collaborators {
                provider: provider.clone(),
                credentials: credentials.clone(),
                api: api.clone(),
                alerts: alerts.clone(),
                reachability: reachability.clone(),
                preparer: preparer.clone(),
                prefs: prefs.clone(),
            },
            ControllerSettings::default(),
        );

        Self {
            controller,
            provider,
            credentials,
            api,
            alerts,
            reachability,
            preparer,
            prefs,
        }
    }
}
