//! kestrel - VPN client with connection-state reconciliation
//!
//! A command-line VPN client driving OpenConnect, with secure credential
//! storage in the system keyring and account-aware failure analysis.

use clap::{Parser, Subcommand};
use kestrel_core::{error::KestrelError, init_logging};

mod cli;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "VPN client with secure credential management")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Setup VPN configuration and credentials securely
    Setup,
    /// Manage VPN connection (on/off/status)
    Vpn {
        #[command(subcommand)]
        action: VpnCommands,
    },
}

#[derive(Subcommand)]
enum VpnCommands {
    /// Connect to VPN
    On,
    /// Disconnect from VPN
    Off,
    /// Show VPN connection status
    Status,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Setup => cli::setup::run_setup().await,
        Commands::Vpn { action } => match action {
            VpnCommands::On => cli::vpn::run_vpn_on().await,
            VpnCommands::Off => cli::vpn::run_vpn_off().await,
            VpnCommands::Status => cli::vpn::run_vpn_status().await,
        },
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let exit_code = match e {
                // Configuration and setup errors (exit code 2)
                KestrelError::Config(_)
                | KestrelError::Toml(_)
                | KestrelError::TomlSerialize(_)
                | KestrelError::Credential(_) => 2,
                // Runtime errors (exit code 1)
                KestrelError::Connect(_)
                | KestrelError::Api(_)
                | KestrelError::Provider(_)
                | KestrelError::Io(_) => 1,
            };

            eprintln!("{}", e);
            std::process::exit(exit_code);
        }
    }
}
