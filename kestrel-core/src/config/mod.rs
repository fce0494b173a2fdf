//! Configuration module
//!
//! Handles loading and saving client configuration from TOML files.

use crate::types::{ConnectionDescriptor, TunnelProtocol};
use crate::vpn::controller::ControllerSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod toml_config;

/// Client configuration structure
///
/// Contains all non-sensitive connection parameters. Sensitive data like
/// the session secret is stored separately in the keyring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// VPN server hostname or IP address
    pub server: String,

    /// VPN server port (default: 443)
    pub port: u16,

    /// Username for VPN authentication
    pub username: String,

    /// Tunnel protocol to use
    #[serde(default)]
    pub protocol: TunnelProtocol,

    /// Disable DTLS and use TLS only
    #[serde(default)]
    pub no_dtls: bool,

    /// How long a connection attempt may stay pending, in seconds
    pub attempt_timeout_secs: Option<u32>,

    /// Base URL of the account API
    pub api_base_url: String,

    /// Deep link into account management, surfaced on billing issues
    pub management_url: String,

    /// Endpoint probed while connected
    pub health_check_endpoint: Option<String>,

    /// Interval between health probes, in seconds
    pub health_check_interval_secs: Option<u32>,
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.is_empty() {
            return Err("Server cannot be empty".to_string());
        }

        // Basic hostname validation
        if !self
            .server
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
        {
            return Err("Server contains invalid characters".to_string());
        }

        if self.port == 0 {
            return Err("Port cannot be zero".to_string());
        }

        if self.username.is_empty() {
            return Err("Username cannot be empty".to_string());
        }

        if self.api_base_url.is_empty() {
            return Err("API base URL cannot be empty".to_string());
        }

        if let Some(timeout) = self.attempt_timeout_secs {
            if timeout == 0 {
                return Err("Attempt timeout cannot be zero".to_string());
            }
        }

        if let Some(interval) = self.health_check_interval_secs {
            if interval == 0 {
                return Err("Health check interval cannot be zero".to_string());
            }
        }

        Ok(())
    }

    /// Connection descriptor for the configured endpoint
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            server: self.server.clone(),
            port: self.port,
            protocol: self.protocol,
        }
    }

    /// Controller settings derived from this configuration
    pub fn controller_settings(&self) -> ControllerSettings {
        let defaults = ControllerSettings::default();
        ControllerSettings {
            attempt_timeout: self
                .attempt_timeout_secs
                .map(|secs| Duration::from_secs(secs as u64))
                .unwrap_or(defaults.attempt_timeout),
            health_check_endpoint: self
                .health_check_endpoint
                .clone()
                .unwrap_or(defaults.health_check_endpoint),
            health_check_interval: self
                .health_check_interval_secs
                .map(|secs| Duration::from_secs(secs as u64))
                .unwrap_or(defaults.health_check_interval),
            health_check_timeout: defaults.health_check_timeout,
            management_url: self.management_url.clone(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 443,
            username: String::new(),
            protocol: TunnelProtocol::default(),
            no_dtls: false,
            attempt_timeout_secs: Some(30),
            api_base_url: String::new(),
            management_url: String::new(),
            health_check_endpoint: None,
            health_check_interval_secs: None,
        }
    }
}
