//! Integration tests for the state reconciler
//!
//! These tests verify that raw tunnel states map onto app-facing states
//! according to the transition table, and that notifications preserve
//! ordering.

mod support;

use kestrel_core::error::ConnectError;
use kestrel_core::vpn::prefs::Preferences;
use kestrel_core::vpn::state::{AppState, TunnelState};
use kestrel_core::vpn::Alert;
use support::{descriptor, settle, TestHarness};
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test]
async fn test_uninitialized_and_reasserting_publish_nothing() {
    let harness = TestHarness::new();
    let mut states = harness.controller.subscribe();

    harness.controller.reconcile(TunnelState::Uninitialized);
    harness.controller.reconcile(TunnelState::Reasserting);

    assert!(matches!(states.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(harness.controller.state(), AppState::Disconnected);
}

#[tokio::test]
async fn test_disconnected_maps_to_disconnected_without_attempt() {
    let harness = TestHarness::new();
    let mut states = harness.controller.subscribe();

    harness.controller.reconcile(TunnelState::Disconnected);

    assert_eq!(states.try_recv().unwrap(), AppState::Disconnected);
    assert_eq!(harness.controller.state(), AppState::Disconnected);
}

#[tokio::test]
async fn test_disconnected_during_attempt_maps_to_preparing() {
    let harness = TestHarness::new();
    harness.controller.prepare_to_connect().await;

    harness.controller.reconcile(TunnelState::Disconnected);

    assert_eq!(harness.controller.state(), AppState::PreparingConnection);
}

#[tokio::test]
async fn test_connecting_maps_to_connecting() {
    let harness = TestHarness::new();

    harness
        .controller
        .reconcile(TunnelState::Connecting(descriptor()));

    assert_eq!(
        harness.controller.state(),
        AppState::Connecting(descriptor())
    );
}

#[tokio::test]
async fn test_connected_resolves_the_attempt() {
    let harness = TestHarness::new();
    harness.controller.prepare_to_connect().await;
    harness.controller.connect(descriptor()).await;

    harness
        .controller
        .reconcile(TunnelState::Connecting(descriptor()));
    harness
        .controller
        .reconcile(TunnelState::Connected(descriptor()));

    assert_eq!(
        harness.controller.state(),
        AppState::Connected(descriptor())
    );
    assert!(harness.controller.connected_date().is_some());
    assert!(!harness.prefs.intentional_disconnect());

    // The attempt resolved, so a later Disconnected is not a pending attempt
    harness.controller.reconcile(TunnelState::Disconnected);
    assert_eq!(harness.controller.state(), AppState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connected_cancels_the_attempt_timer() {
    let harness = TestHarness::new();
    harness.controller.prepare_to_connect().await;
    harness.controller.connect(descriptor()).await;
    harness
        .controller
        .reconcile(TunnelState::Connected(descriptor()));

    // Well past the attempt timeout; a live timer would force an abort
    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    settle().await;

    assert_eq!(
        harness.controller.state(),
        AppState::Connected(descriptor())
    );
    assert!(harness.alerts.recorded().is_empty());
}

#[tokio::test]
async fn test_startup_failure_is_suppressed() {
    // Given a tunnel whose very first report after the uninitialized
    // baseline is a failure
    let harness = TestHarness::new();
    let mut states = harness.controller.subscribe();

    harness.controller.reconcile(TunnelState::Uninitialized);
    harness
        .controller
        .reconcile(TunnelState::Failed("stale session".to_string()));

    // Then nothing is surfaced
    assert!(matches!(states.try_recv(), Err(TryRecvError::Empty)));
    assert!(harness.alerts.recorded().is_empty());
    assert_eq!(harness.controller.state(), AppState::Disconnected);
}

#[tokio::test]
async fn test_failure_after_real_state_is_surfaced() {
    let harness = TestHarness::new();
    harness.controller.reconcile(TunnelState::Disconnected);

    harness
        .controller
        .reconcile(TunnelState::Failed("tunnel died".to_string()));

    assert_eq!(
        harness.controller.state(),
        AppState::Failed(ConnectError::TunnelReportedFailure(
            "tunnel died".to_string()
        ))
    );
    // With no attempt to analyze, the raw failure carries its own alert
    assert_eq!(
        harness.alerts.recorded(),
        vec![Alert::TunnelFailure {
            reason: "tunnel died".to_string()
        }]
    );
}

#[tokio::test]
async fn test_disconnecting_without_attempt_maps_to_disconnecting() {
    let harness = TestHarness::new();

    harness
        .controller
        .reconcile(TunnelState::Disconnecting(descriptor()));

    assert_eq!(
        harness.controller.state(),
        AppState::Disconnecting(descriptor())
    );
}

#[tokio::test]
async fn test_disconnecting_during_attempt_maps_to_preparing() {
    let harness = TestHarness::new();
    harness.controller.prepare_to_connect().await;

    harness
        .controller
        .reconcile(TunnelState::Disconnecting(descriptor()));

    assert_eq!(harness.controller.state(), AppState::PreparingConnection);
}

#[tokio::test]
async fn test_notifications_preserve_order_without_coalescing() {
    let harness = TestHarness::new();
    let mut states = harness.controller.subscribe();

    harness.controller.reconcile(TunnelState::Disconnected);
    harness
        .controller
        .reconcile(TunnelState::Connecting(descriptor()));
    harness.controller.reconcile(TunnelState::Disconnected);
    harness.controller.reconcile(TunnelState::Disconnected);

    assert_eq!(states.try_recv().unwrap(), AppState::Disconnected);
    assert_eq!(
        states.try_recv().unwrap(),
        AppState::Connecting(descriptor())
    );
    assert_eq!(states.try_recv().unwrap(), AppState::Disconnected);
    // Unchanged values are still published
    assert_eq!(states.try_recv().unwrap(), AppState::Disconnected);
}

#[tokio::test]
async fn test_run_loop_consumes_provider_pushes() {
    let harness = TestHarness::new();
    harness.controller.run();
    let mut states = harness.controller.subscribe();

    harness.provider.push_state(TunnelState::Disconnected);
    harness
        .provider
        .push_state(TunnelState::Connecting(descriptor()));
    settle().await;

    assert_eq!(states.try_recv().unwrap(), AppState::Disconnected);
    assert_eq!(
        states.try_recv().unwrap(),
        AppState::Connecting(descriptor())
    );
}

#[tokio::test]
async fn test_refresh_state_rereads_the_provider() {
    let harness = TestHarness::new();
    harness.provider.set_state(TunnelState::Connected(descriptor()));

    harness.controller.refresh_state();

    assert_eq!(
        harness.controller.state(),
        AppState::Connected(descriptor())
    );
}

#[tokio::test]
async fn test_controller_seeds_from_provider_state() {
    let harness = TestHarness::with_initial_state(TunnelState::Connected(descriptor()));
    assert_eq!(
        harness.controller.state(),
        AppState::Connected(descriptor())
    );
    assert_eq!(harness.controller.active_connection(), Some(descriptor()));
}
