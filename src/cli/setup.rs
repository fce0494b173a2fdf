//! Setup command implementation
//!
//! Interactive command for first-time configuration with secure credential
//! storage.

use kestrel_core::{
    config::{toml_config, ClientConfig},
    error::{ConfigError, KestrelError},
    types::{Credentials, SessionSecret, TunnelProtocol},
    vpn::credentials::{CredentialStore, KeyringCredentialStore},
};
use std::io::{self, Write};

/// Run the setup command
pub async fn run_setup() -> Result<(), KestrelError> {
    println!("🔐 kestrel VPN Setup");
    println!("====================");
    println!();
    println!("This will configure your VPN connection securely.");
    println!("Credentials will be stored in your system keyring.");
    println!("Configuration will be saved to ~/.config/kestrel/config.toml");
    println!();

    // Check if already configured
    let config_path = toml_config::get_config_path()?;
    if config_path.exists() {
        println!("⚠️  Existing configuration detected.");
        if !prompt_yes_no("Overwrite existing setup? (y/N)", false)? {
            println!("Setup cancelled.");
            return Ok(());
        }
        println!();
    }

    // Collect configuration interactively
    let config = collect_client_config()?;
    let secret = prompt_required("Session secret")?;

    config.validate().map_err(|e| {
        KestrelError::Config(ConfigError::ValidationError {
            message: format!("Configuration validation failed: {}", e),
        })
    })?;

    println!();
    println!("💾 Saving configuration...");

    toml_config::TomlConfig::new(config.clone()).to_file(&config_path)?;

    // Session limits and the delinquency flag are refreshed from the account
    // API on the first failure investigation.
    let store = KeyringCredentialStore::new(config.username.clone());
    store
        .store(&Credentials::new(1, false, SessionSecret::new(secret)))
        .await?;

    println!("✅ Setup complete!");
    println!();
    println!("You can now use:");
    println!("  kestrel vpn on     - Connect to VPN");
    println!("  kestrel vpn off    - Disconnect from VPN");
    println!("  kestrel vpn status - Show connection status");

    Ok(())
}

/// Collect the client configuration interactively
fn collect_client_config() -> Result<ClientConfig, KestrelError> {
    let server = prompt_required("VPN server hostname")?;
    let port = prompt_with_default("VPN server port", "443")?
        .parse::<u16>()
        .map_err(|_| {
            KestrelError::Config(ConfigError::ValidationError {
                message: "Port must be a number between 1 and 65535".to_string(),
            })
        })?;
    let username = prompt_required("Username")?;
    let protocol = match prompt_with_default("Protocol (anyconnect/f5/gp)", "anyconnect")?.as_str()
    {
        "f5" => TunnelProtocol::F5,
        "gp" => TunnelProtocol::Gp,
        _ => TunnelProtocol::Anyconnect,
    };
    let api_base_url = prompt_required("Account API base URL")?;
    let management_url = prompt_required("Account management URL")?;

    Ok(ClientConfig {
        server,
        port,
        username,
        protocol,
        api_base_url,
        management_url,
        ..ClientConfig::default()
    })
}

/// Prompt for a required value, retrying until non-empty
fn prompt_required(label: &str) -> Result<String, KestrelError> {
    loop {
        let value = prompt(&format!("{}: ", label))?;
        if !value.is_empty() {
            return Ok(value);
        }
        println!("A value is required.");
    }
}

/// Prompt for a value with a default
fn prompt_with_default(label: &str, default: &str) -> Result<String, KestrelError> {
    let value = prompt(&format!("{} [{}]: ", label, default))?;
    if value.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(value)
    }
}

/// Prompt for a yes/no answer
fn prompt_yes_no(label: &str, default: bool) -> Result<bool, KestrelError> {
    let value = prompt(&format!("{} ", label))?;
    if value.is_empty() {
        return Ok(default);
    }
    Ok(matches!(value.to_lowercase().as_str(), "y" | "yes"))
}

fn prompt(label: &str) -> Result<String, KestrelError> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
