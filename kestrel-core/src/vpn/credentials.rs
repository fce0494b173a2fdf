//! Secure credential storage
//!
//! Uses the system keyring (GNOME Keyring on Linux) to store and retrieve
//! account credentials, the cached server certificate, and any leftover
//! legacy secret from older client versions.

use crate::error::CredentialError;
use crate::types::{Credentials, SessionSecret};
use async_trait::async_trait;
use data_encoding::BASE64;
use keyring::Entry;
use serde::{Deserialize, Serialize};

/// Keyring service name for account credentials
const KEYRING_SERVICE_SESSION: &str = "kestrel-vpn-session";

/// Keyring service name for the cached server certificate
const KEYRING_SERVICE_CERT: &str = "kestrel-vpn-cert";

/// Keyring service name used by pre-0.3 clients for the raw secret
const KEYRING_SERVICE_LEGACY: &str = "kestrel-vpn-secret";

/// Store of account credentials and related secrets
///
/// Fetch and store hit the platform keyring and are modeled as suspension
/// points; the remaining operations are quick lookups performed during
/// attempt preparation.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the current account credentials
    async fn fetch(&self) -> Result<Credentials, CredentialError>;

    /// Persist account credentials
    async fn store(&self, credentials: &Credentials) -> Result<(), CredentialError>;

    /// Whether a legacy secret from an older client version is present
    fn has_legacy_secret(&self) -> bool;

    /// Remove the legacy secret
    fn clear_legacy_secret(&self) -> Result<(), CredentialError>;

    /// Read the cached server certificate (DER)
    fn server_certificate(&self) -> Result<Vec<u8>, CredentialError>;

    /// Cache the server certificate (DER)
    fn store_server_certificate(&self, der: &[u8]) -> Result<(), CredentialError>;
}

/// Serialized keyring representation of `Credentials`
#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    secret: String,
    max_concurrent_sessions: u32,
    delinquent: bool,
}

impl From<&Credentials> for StoredCredentials {
    fn from(credentials: &Credentials) -> Self {
        Self {
            secret: credentials.secret.expose().to_string(),
            max_concurrent_sessions: credentials.max_concurrent_sessions,
            delinquent: credentials.delinquent,
        }
    }
}

impl From<StoredCredentials> for Credentials {
    fn from(stored: StoredCredentials) -> Self {
        Credentials::new(
            stored.max_concurrent_sessions,
            stored.delinquent,
            SessionSecret::new(stored.secret),
        )
    }
}

/// Credential store backed by the system keyring
pub struct KeyringCredentialStore {
    username: String,
}

impl KeyringCredentialStore {
    /// Create a store scoped to one account username
    pub fn new(username: String) -> Self {
        Self { username }
    }

    fn entry(service: &str, username: &str) -> Result<Entry, CredentialError> {
        Entry::new(service, username).map_err(|_| CredentialError::ServiceUnavailable)
    }

    fn fetch_blocking(username: &str) -> Result<Credentials, CredentialError> {
        let entry = Self::entry(KEYRING_SERVICE_SESSION, username)?;
        let raw = entry
            .get_password()
            .map_err(|_| CredentialError::NotFound)?;
        let stored: StoredCredentials =
            serde_json::from_str(&raw).map_err(|_| CredentialError::InvalidFormat)?;
        Ok(stored.into())
    }

    fn store_blocking(username: &str, credentials: &Credentials) -> Result<(), CredentialError> {
        let entry = Self::entry(KEYRING_SERVICE_SESSION, username)?;
        let raw = serde_json::to_string(&StoredCredentials::from(credentials))
            .map_err(|_| CredentialError::InvalidFormat)?;
        entry
            .set_password(&raw)
            .map_err(|_| CredentialError::StoreFailed)
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn fetch(&self) -> Result<Credentials, CredentialError> {
        let username = self.username.clone();
        tokio::task::spawn_blocking(move || Self::fetch_blocking(&username))
            .await
            .map_err(|_| CredentialError::ServiceUnavailable)?
    }

    async fn store(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let username = self.username.clone();
        let credentials = credentials.clone();
        tokio::task::spawn_blocking(move || Self::store_blocking(&username, &credentials))
            .await
            .map_err(|_| CredentialError::ServiceUnavailable)?
    }

    fn has_legacy_secret(&self) -> bool {
        Self::entry(KEYRING_SERVICE_LEGACY, &self.username)
            .and_then(|entry| entry.get_password().map_err(|_| CredentialError::NotFound))
            .is_ok()
    }

    fn clear_legacy_secret(&self) -> Result<(), CredentialError> {
        let entry = Self::entry(KEYRING_SERVICE_LEGACY, &self.username)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            // Nothing to clear counts as cleared
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(_) => Err(CredentialError::StoreFailed),
        }
    }

    fn server_certificate(&self) -> Result<Vec<u8>, CredentialError> {
        let entry = Self::entry(KEYRING_SERVICE_CERT, &self.username)?;
        let encoded = entry
            .get_password()
            .map_err(|_| CredentialError::CertificateMissing)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(|_| CredentialError::InvalidFormat)
    }

    fn store_server_certificate(&self, der: &[u8]) -> Result<(), CredentialError> {
        let entry = Self::entry(KEYRING_SERVICE_CERT, &self.username)?;
        entry
            .set_password(&BASE64.encode(der))
            .map_err(|_| CredentialError::StoreFailed)
    }
}
