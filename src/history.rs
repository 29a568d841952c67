use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{self, keys, Storage};

/// One watch-history entry per series (title + source), not per episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    /// Direct media URL of the episode last watched.
    pub direct_video_url: String,
    /// Player link that restores this exact episode and position.
    pub player_url: String,
    /// Index of the episode last watched. Absent in entries written by
    /// older versions of the ledger.
    #[serde(default)]
    pub episode_index: Option<usize>,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub source_code: String,
    #[serde(default)]
    pub vod_id: String,
    /// De-duplication key for the series, together with title and source.
    pub show_identifier: String,
    pub timestamp: i64,
    #[serde(default)]
    pub playback_position: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub episodes: Vec<String>,
}

impl HistoryEntry {
    /// Series identifier: `source_name + "_" + vod_id` when both are known,
    /// else the first episode URL, else the current video URL.
    pub fn show_identifier(
        source_name: &str,
        vod_id: &str,
        episodes: &[String],
        current_url: &str,
    ) -> String {
        if !source_name.is_empty() && !vod_id.is_empty() {
            format!("{}_{}", source_name, vod_id)
        } else if let Some(first) = episodes.first() {
            first.clone()
        } else {
            current_url.to_string()
        }
    }

    fn same_series(&self, other: &HistoryEntry) -> bool {
        self.title == other.title
            && self.source_name == other.source_name
            && self.show_identifier == other.show_identifier
    }
}

/// Ordered, size-bounded ledger of recently watched series.
#[derive(Clone)]
pub struct HistoryStore {
    storage: Arc<dyn Storage>,
    limit: usize,
    position_floor: f64,
    sync_min_delta: f64,
}

impl HistoryStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        limit: usize,
        position_floor: f64,
        sync_min_delta: f64,
    ) -> Self {
        Self {
            storage,
            limit,
            position_floor,
            sync_min_delta,
        }
    }

    pub fn list(&self) -> Vec<HistoryEntry> {
        storage::get_json(self.storage.as_ref(), keys::HISTORY).unwrap_or_default()
    }

    pub fn clear(&self) {
        self.storage.remove(keys::HISTORY);
    }

    /// Insert or refresh the entry for a series and move it to the head.
    ///
    /// On a match, episode index, timestamps, source metadata and URLs are
    /// always overwritten; the stored position only when the new one is past
    /// the floor (a reload that restarted from zero must not erase real
    /// progress); the episode list only when it genuinely differs.
    pub fn upsert(&self, entry: HistoryEntry) {
        let mut history = self.list();

        if let Some(pos) = history.iter().position(|e| e.same_series(&entry)) {
            let mut existing = history.remove(pos);
            existing.episode_index = entry.episode_index;
            existing.timestamp = entry.timestamp;
            existing.source_name = entry.source_name;
            existing.source_code = entry.source_code;
            existing.vod_id = entry.vod_id;
            existing.direct_video_url = entry.direct_video_url;
            existing.player_url = entry.player_url;
            if entry.playback_position > self.position_floor {
                existing.playback_position = entry.playback_position;
            }
            if entry.duration > 0.0 {
                existing.duration = entry.duration;
            }
            if !entry.episodes.is_empty() && existing.episodes != entry.episodes {
                existing.episodes = entry.episodes;
            }
            history.insert(0, existing);
        } else {
            history.insert(0, entry);
        }

        history.truncate(self.limit);
        storage::set_json(self.storage.as_ref(), keys::HISTORY, &history);
    }

    /// Lightweight periodic path: update position/duration for the entry
    /// matching title and episode index, only when the delta is noticeable.
    /// Entries from older ledgers with no stored index also match.
    pub fn sync_progress(
        &self,
        title: &str,
        episode_index: usize,
        position: f64,
        duration: f64,
    ) -> bool {
        let mut history = self.list();
        let Some(entry) = history.iter_mut().find(|e| {
            e.title == title && e.episode_index.map_or(true, |i| i == episode_index)
        }) else {
            return false;
        };

        let moved = (entry.playback_position - position).abs() > self.sync_min_delta
            || (entry.duration - duration).abs() > self.sync_min_delta;
        if !moved {
            return false;
        }

        entry.playback_position = position;
        entry.duration = duration;
        entry.timestamp = Utc::now().timestamp_millis();
        storage::set_json(self.storage.as_ref(), keys::HISTORY, &history);
        debug!(title, episode_index, position, "Synced history progress");
        true
    }
}
