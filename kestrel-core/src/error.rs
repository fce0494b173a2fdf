//! Error types for the kestrel VPN client
//!
//! This module defines all error types used throughout the application,
//! providing consistent error handling and user-friendly error messages.

use thiserror::Error;

/// Main error type for the kestrel application
#[derive(Error, Debug)]
pub enum KestrelError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to credential storage
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Errors surfaced by a connection attempt
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// Errors from the account API
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Errors from the tunnel provider
    #[error("Tunnel provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Failed to save configuration file: {path}")]
    SaveFailed { path: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Credential store operation errors
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Keyring service unavailable")]
    ServiceUnavailable,

    #[error("Failed to store credential in keyring")]
    StoreFailed,

    #[error("Failed to retrieve credential from keyring")]
    RetrieveFailed,

    #[error("Credential not found in keyring")]
    NotFound,

    #[error("Invalid credential format")]
    InvalidFormat,

    #[error("Server certificate not cached")]
    CertificateMissing,
}

/// Connection failure categories surfaced by the state reconciler
///
/// Every recoverable failure resolves into an `AppState::Failed` carrying
/// one of these, plus exactly one alert push. Nothing propagates past the
/// connection controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Cannot access account credentials")]
    CredentialUnavailable,

    #[error("Failed to prepare tunnel configuration")]
    ConfigurationPreparationFailed,

    #[error("No network transport available")]
    NetworkUnreachable,

    #[error("Account is delinquent")]
    DelinquentAccount,

    #[error("Active session limit exceeded: {active} of {allowed} allowed")]
    SessionLimitExceeded { active: u32, allowed: u32 },

    #[error("Tunnel is stuck disconnecting")]
    StuckDisconnect,

    #[error("Tunnel reported failure: {0}")]
    TunnelReportedFailure(String),

    #[error("Connection attempt timed out")]
    AttemptTimedOut,
}

/// Account API operation errors
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Invalid API endpoint: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected response status: {0}")]
    UnexpectedStatus(u16),

    #[error("Invalid response payload: {0}")]
    InvalidResponse(String),
}

/// Tunnel provider operation errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Tunnel binary not found: {0}")]
    BinaryMissing(String),

    #[error("Failed to spawn tunnel process: {0}")]
    SpawnFailed(String),

    #[error("Failed to terminate tunnel process: {0}")]
    TerminationFailed(String),

    #[error("Failed to remove tunnel configurations: {0}")]
    RemovalFailed(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, KestrelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        assert_eq!(
            ConnectError::SessionLimitExceeded {
                active: 5,
                allowed: 5
            }
            .to_string(),
            "Active session limit exceeded: 5 of 5 allowed"
        );
        assert_eq!(
            ConnectError::NetworkUnreachable.to_string(),
            "No network transport available"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: KestrelError = CredentialError::NotFound.into();
        assert!(matches!(err, KestrelError::Credential(_)));

        let err: KestrelError = ConnectError::AttemptTimedOut.into();
        assert!(matches!(err, KestrelError::Connect(_)));
    }
}
