//! Narrow persistence capability interface.
//!
//! Everything the controller persists goes through [`Storage`] so the core
//! state machine runs against in-memory fakes in tests. Access is treated as
//! synchronous; failures are caught at the call site and degrade the feature
//! for the session instead of propagating.

mod file;

pub use file::FileStorage;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage write failed for key {key}: {reason}")]
    Write { key: String, reason: String },
}

/// String-keyed key/value persistence.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str);
}

/// Well-known storage keys shared with the embedding site.
pub mod keys {
    use crate::identity::VideoIdentity;

    pub const HISTORY: &str = "viewingHistory";
    pub const EPISODES: &str = "currentEpisodes";
    pub const AUTOPLAY: &str = "autoplayEnabled";
    pub const AD_FILTER: &str = "adFilteringEnabled";
    pub const REVERSED: &str = "episodesReversed";
    pub const LAST_PAGE: &str = "lastPageUrl";
    pub const CURRENT_TITLE: &str = "currentVideoTitle";
    pub const PLAYING_ID: &str = "currentPlayingId";
    pub const PLAYING_SOURCE: &str = "currentPlayingSource";

    const PROGRESS_PREFIX: &str = "videoProgress_";

    pub fn progress(identity: &VideoIdentity) -> String {
        format!("{}{}", PROGRESS_PREFIX, identity)
    }
}

/// Read and decode a JSON value; malformed or missing data yields `None`.
pub fn get_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Option<T> {
    let raw = storage.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Discarding malformed stored JSON");
            None
        }
    }
}

/// Encode and write a JSON value; failures are logged and swallowed.
pub fn set_json<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => {
            if let Err(e) = storage.set(key, &raw) {
                warn!(key, error = %e, "Storage write failed");
            }
        }
        Err(e) => warn!(key, error = %e, "Failed to encode value for storage"),
    }
}

/// Read a boolean toggle: only a stored literal overrides the default.
pub fn flag(storage: &dyn Storage, key: &str, default: bool) -> bool {
    match storage.get(key).as_deref() {
        Some("true") => true,
        Some("false") => false,
        _ => default,
    }
}

/// Persist a boolean toggle; failures are logged and swallowed.
pub fn set_flag(storage: &dyn Storage, key: &str, value: bool) {
    if let Err(e) = storage.set(key, if value { "true" } else { "false" }) {
        warn!(key, error = %e, "Storage write failed");
    }
}

/// In-memory storage used by tests and short-lived embeddings.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().expect("storage lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.map
            .lock()
            .expect("storage lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.map.lock().expect("storage lock").remove(key);
    }
}
