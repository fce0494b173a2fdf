//! Persisted user preferences
//!
//! Single-writer key-value state shared with the rest of the application:
//! the intentional-disconnect flag, the last-connected timestamp, and the
//! last descriptor used per protocol. Last-write-wins, no transactional
//! guarantees.

use crate::types::{ConnectionDescriptor, TunnelProtocol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Persisted preferences read and written by the connection controller
pub trait Preferences: Send + Sync {
    /// Whether the user disconnected on purpose
    fn intentional_disconnect(&self) -> bool;

    /// Record whether the disconnect was on purpose
    fn set_intentional_disconnect(&self, value: bool);

    /// When the client last reached the Connected state, if ever
    fn last_connected(&self) -> Option<DateTime<Utc>>;

    /// Record a successful connection
    fn set_last_connected(&self, when: DateTime<Utc>);

    /// Last descriptor used for the given protocol
    fn last_descriptor(&self, protocol: TunnelProtocol) -> Option<ConnectionDescriptor>;

    /// Record the descriptor used for an attempt
    fn set_last_descriptor(&self, descriptor: &ConnectionDescriptor);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PrefsData {
    #[serde(default)]
    intentional_disconnect: bool,

    #[serde(default)]
    last_connected: Option<DateTime<Utc>>,

    /// Keyed by protocol name
    #[serde(default)]
    descriptors: BTreeMap<String, ConnectionDescriptor>,
}

/// TOML-file-backed preferences
///
/// Every setter writes through to disk; write failures are logged and the
/// in-memory value kept, matching last-write-wins semantics.
pub struct FilePreferences {
    path: PathBuf,
    data: Mutex<PrefsData>,
}

impl FilePreferences {
    /// Load preferences from `path`, starting empty if the file is missing
    /// or unreadable
    pub fn load(path: PathBuf) -> Self {
        let data = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "preferences file corrupt, starting fresh");
                PrefsData::default()
            }),
            Err(_) => PrefsData::default(),
        };

        Self {
            path,
            data: Mutex::new(data),
        }
    }

    fn persist(&self, data: &PrefsData) {
        if let Err(e) = write_prefs(&self.path, data) {
            warn!(path = %self.path.display(), error = %e, "failed to persist preferences");
        }
    }

    fn update<F: FnOnce(&mut PrefsData)>(&self, f: F) {
        let mut data = self.data.lock().unwrap();
        f(&mut data);
        self.persist(&data);
    }
}

fn write_prefs(path: &Path, data: &PrefsData) -> std::io::Result<()> {
    let contents = toml::to_string_pretty(data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

impl Preferences for FilePreferences {
    fn intentional_disconnect(&self) -> bool {
        self.data.lock().unwrap().intentional_disconnect
    }

    fn set_intentional_disconnect(&self, value: bool) {
        self.update(|data| data.intentional_disconnect = value);
    }

    fn last_connected(&self) -> Option<DateTime<Utc>> {
        self.data.lock().unwrap().last_connected
    }

    fn set_last_connected(&self, when: DateTime<Utc>) {
        self.update(|data| data.last_connected = Some(when));
    }

    fn last_descriptor(&self, protocol: TunnelProtocol) -> Option<ConnectionDescriptor> {
        self.data
            .lock()
            .unwrap()
            .descriptors
            .get(protocol.as_str())
            .cloned()
    }

    fn set_last_descriptor(&self, descriptor: &ConnectionDescriptor) {
        self.update(|data| {
            data.descriptors
                .insert(descriptor.protocol.as_str().to_string(), descriptor.clone());
        });
    }
}
