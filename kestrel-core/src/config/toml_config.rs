//! TOML configuration file I/O
//!
//! Handles loading and saving client configuration to/from TOML files
//! in the user's configuration directory.

use crate::config::ClientConfig;
use crate::error::{ConfigError, KestrelError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Complete TOML configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Client connection settings
    #[serde(rename = "client")]
    pub client_config: ClientConfig,
}

impl TomlConfig {
    /// Create a new TOML configuration
    pub fn new(client_config: ClientConfig) -> Self {
        Self { client_config }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, KestrelError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KestrelError::Config(ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            })
        })?;

        let config: TomlConfig = toml::from_str(&contents).map_err(|e| {
            KestrelError::Config(ConfigError::ValidationError {
                message: format!("Failed to parse config file: {}", e),
            })
        })?;

        config.client_config.validate().map_err(|message| {
            KestrelError::Config(ConfigError::ValidationError { message })
        })?;

        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), KestrelError> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            KestrelError::Config(ConfigError::ValidationError {
                message: format!("Failed to serialize config: {}", e),
            })
        })?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KestrelError::Config(ConfigError::IoError {
                    message: format!("Failed to create config directory: {}", e),
                })
            })?;
        }

        std::fs::write(path, contents).map_err(|e| {
            KestrelError::Config(ConfigError::IoError {
                message: format!("Failed to write config file: {}", e),
            })
        })?;

        Ok(())
    }

    /// Get the client configuration
    pub fn client_config(&self) -> &ClientConfig {
        &self.client_config
    }
}

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default preferences file name
const PREFS_FILE_NAME: &str = "prefs.toml";

/// Get the default configuration directory
///
/// Returns ~/.config/kestrel, or KESTREL_CONFIG_DIR if set
pub fn get_config_dir() -> Result<PathBuf, KestrelError> {
    // Allow tests to override config directory via environment variable
    if let Ok(config_dir) = std::env::var("KESTREL_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let home = std::env::var("HOME").map_err(|_| {
        KestrelError::Config(ConfigError::IoError {
            message: "HOME environment variable not set".to_string(),
        })
    })?;

    Ok(PathBuf::from(home).join(".config").join("kestrel"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, KestrelError> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Get the default preferences file path
pub fn get_prefs_path() -> Result<PathBuf, KestrelError> {
    Ok(get_config_dir()?.join(PREFS_FILE_NAME))
}
