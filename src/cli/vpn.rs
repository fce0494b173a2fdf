//! VPN connection management commands
//!
//! Wires the connection controller to its production collaborators and
//! drives it from the command line.

use colored::Colorize;
use kestrel_core::config::{toml_config, ClientConfig};
use kestrel_core::error::KestrelError;
use kestrel_core::vpn::api::RestApiService;
use kestrel_core::vpn::credentials::{CredentialStore, KeyringCredentialStore};
use kestrel_core::vpn::prefs::{FilePreferences, Preferences};
use kestrel_core::vpn::provider::{OpenConnectProvider, ProfilePreparer, TunnelProvider};
use kestrel_core::vpn::reachability::{
    NetworkManagerReachability, ReachabilityMonitor, StaticReachability,
};
use kestrel_core::vpn::{AppState, Collaborators, ConnectionController, LogAlertSink};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Timeout for account API requests
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Load the saved client configuration
fn load_config() -> Result<ClientConfig, KestrelError> {
    let path = toml_config::get_config_path()?;
    Ok(toml_config::TomlConfig::from_file(&path)?
        .client_config()
        .clone())
}

/// Build a controller wired to the production collaborators
async fn build_controller(
    config: &ClientConfig,
) -> Result<Arc<ConnectionController>, KestrelError> {
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(KeyringCredentialStore::new(config.username.clone()));
    let provider = Arc::new(OpenConnectProvider::new(Arc::clone(&credentials)));
    let api = Arc::new(RestApiService::new(&config.api_base_url, API_TIMEOUT)?);
    let preparer = Arc::new(ProfilePreparer::new(
        config.username.clone(),
        config.no_dtls,
    ));
    let prefs = Arc::new(FilePreferences::load(toml_config::get_prefs_path()?));

    // Fall back to assuming reachability when NetworkManager is absent
    let reachability: Arc<dyn ReachabilityMonitor> =
        match NetworkManagerReachability::connect().await {
            Ok(monitor) => Arc::new(monitor),
            Err(e) => {
                warn!(error = %e, "NetworkManager unavailable, assuming network is reachable");
                Arc::new(StaticReachability(true))
            }
        };

    let controller = ConnectionController::new(
        Collaborators {
            provider,
            credentials,
            api,
            alerts: Arc::new(LogAlertSink),
            reachability,
            preparer,
            prefs,
        },
        config.controller_settings(),
    );
    controller.run();
    Ok(controller)
}

/// Run the VPN on command
pub async fn run_vpn_on() -> Result<(), KestrelError> {
    let config = load_config()?;
    println!("Connecting to {}...", config.server.bold());

    let controller = build_controller(&config).await?;
    let mut states = controller.subscribe();

    controller.prepare_to_connect().await;
    controller.connect(config.descriptor()).await;

    loop {
        match states.recv().await {
            Ok(AppState::Connected(descriptor)) => {
                println!(
                    "{} {}",
                    "✓ Connected to".green().bold(),
                    descriptor.server.green().bold()
                );
                return Ok(());
            }
            Ok(AppState::Failed(e)) => {
                println!("{} {}", "✗ Connection failed:".red().bold(), e);
                return Err(e.into());
            }
            Ok(AppState::Aborted { user_initiated }) => {
                if user_initiated {
                    println!("Connection attempt cancelled.");
                } else {
                    println!("{}", "✗ Connection attempt aborted.".red());
                }
                return Ok(());
            }
            Ok(state) => println!("  {}", state),
            Err(_) => return Ok(()),
        }
    }
}

/// Run the VPN off command
pub async fn run_vpn_off() -> Result<(), KestrelError> {
    let config = load_config()?;

    // The tunnel daemon outlives the process that started it, so teardown
    // goes through configuration removal rather than a tracked child.
    let prefs = FilePreferences::load(toml_config::get_prefs_path()?);
    prefs.set_intentional_disconnect(true);

    let credentials: Arc<dyn CredentialStore> =
        Arc::new(KeyringCredentialStore::new(config.username.clone()));
    let provider = OpenConnectProvider::new(credentials);
    provider.remove_configurations().await?;

    println!("{}", "VPN disconnected".green());
    Ok(())
}

/// Run the VPN status command
pub async fn run_vpn_status() -> Result<(), KestrelError> {
    let running = tokio::process::Command::new("pgrep")
        .arg("openconnect")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false);

    if running {
        println!("{}", "VPN is connected".green().bold());
        let prefs = FilePreferences::load(toml_config::get_prefs_path()?);
        if let Some(when) = prefs.last_connected() {
            println!(
                "Connected since: {}",
                when.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            );
        }
    } else {
        println!("{}", "VPN is disconnected".red());
    }
    Ok(())
}
