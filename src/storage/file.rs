use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use super::{Storage, StorageError};

/// JSON-file-backed storage for the CLI and other host processes.
///
/// The whole map is rewritten on every set, so concurrent writers resolve to
/// last-writer-wins without corrupting individual records. A missing or
/// malformed file degrades to an empty map.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = Self::load(&path);
        Self {
            path,
            map: Mutex::new(map),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> HashMap<String, String> {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring malformed storage file");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read storage file");
                HashMap::new()
            }
        }
    }

    fn flush(&self, map: &HashMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(map).map_err(|e| StorageError::Write {
            key: String::new(),
            reason: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Write {
                    key: String::new(),
                    reason: e.to_string(),
                })?;
            }
        }
        std::fs::write(&self.path, raw).map_err(|e| StorageError::Write {
            key: String::new(),
            reason: e.to_string(),
        })
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().expect("storage lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.map.lock().expect("storage lock");
        map.insert(key.to_string(), value.to_string());
        self.flush(&map).map_err(|e| match e {
            StorageError::Write { reason, .. } => StorageError::Write {
                key: key.to_string(),
                reason,
            },
        })
    }

    fn remove(&self, key: &str) {
        let mut map = self.map.lock().expect("storage lock");
        if map.remove(key).is_some() {
            if let Err(e) = self.flush(&map) {
                warn!(key, error = %e, "Failed to persist removal");
            }
        }
    }
}
