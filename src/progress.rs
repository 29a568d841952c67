use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::VideoIdentity;
use crate::storage::{self, keys, Storage};

/// Last known playhead for one video identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackProgress {
    pub position: f64,
    pub duration: f64,
    pub timestamp: i64,
}

/// Durable per-identity resume positions.
///
/// A record is a single overwrite-on-save value; a natural end-of-stream
/// deletes it so a finished episode restarts from the beginning.
#[derive(Clone)]
pub struct ProgressStore {
    storage: Arc<dyn Storage>,
    min_save_position: f64,
}

impl ProgressStore {
    pub fn new(storage: Arc<dyn Storage>, min_save_position: f64) -> Self {
        Self {
            storage,
            min_save_position,
        }
    }

    /// Persist the playhead. No-op when the duration is unknown or the
    /// position is still in the cold-start window, so a fresh load never
    /// clobbers a real saved position with zero.
    pub fn save(&self, identity: &VideoIdentity, position: f64, duration: f64) -> bool {
        if !duration.is_finite() || duration <= 0.0 {
            return false;
        }
        if !position.is_finite() || position < self.min_save_position {
            return false;
        }
        let record = PlaybackProgress {
            position,
            duration,
            timestamp: Utc::now().timestamp_millis(),
        };
        storage::set_json(self.storage.as_ref(), &keys::progress(identity), &record);
        debug!(identity = %identity, position, duration, "Saved playback progress");
        true
    }

    pub fn load(&self, identity: &VideoIdentity) -> Option<PlaybackProgress> {
        let record: PlaybackProgress =
            storage::get_json(self.storage.as_ref(), &keys::progress(identity))?;
        if !record.position.is_finite() || record.position < 0.0 {
            return None;
        }
        Some(record)
    }

    pub fn clear(&self, identity: &VideoIdentity) {
        self.storage.remove(&keys::progress(identity));
    }
}
