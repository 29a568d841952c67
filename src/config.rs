use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning handed to the streaming engine on attach. Buffer bounds and
/// per-request-class retry limits are configuration, not behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTuning {
    /// Seconds of already-played media kept behind the playhead.
    pub back_buffer_secs: f64,
    /// Target forward buffer in seconds.
    pub max_buffer_secs: f64,
    /// Hard ceiling on the forward buffer in seconds.
    pub max_max_buffer_secs: f64,
    /// Forward buffer ceiling in bytes.
    pub max_buffer_bytes: u64,
    /// Largest buffer hole jumped over without stalling, in seconds.
    pub max_buffer_hole_secs: f64,
    /// Maximum retries for the master manifest request.
    pub manifest_max_retries: u32,
    pub manifest_retry_delay: Duration,
    /// Maximum retries for level/quality playlist requests.
    pub level_max_retries: u32,
    pub level_retry_delay: Duration,
    /// Maximum retries for media fragment requests.
    pub frag_max_retries: u32,
    pub frag_retry_delay: Duration,
    /// Ceiling on accumulated fragment retry backoff.
    pub frag_retry_timeout: Duration,
    /// Buffer-append retries inside the engine before it reports a fault.
    pub append_error_max_retry: u32,
    /// HTTP request timeout for manifest/level fetches.
    pub request_timeout: Duration,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            back_buffer_secs: 90.0,
            max_buffer_secs: 30.0,
            max_max_buffer_secs: 60.0,
            max_buffer_bytes: 30 * 1000 * 1000,
            max_buffer_hole_secs: 0.5,
            manifest_max_retries: 3,
            manifest_retry_delay: Duration::from_millis(1000),
            level_max_retries: 4,
            level_retry_delay: Duration::from_millis(1000),
            frag_max_retries: 6,
            frag_retry_delay: Duration::from_millis(1000),
            frag_retry_timeout: Duration::from_millis(64000),
            append_error_max_retry: 5,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for one playback session controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub engine: EngineTuning,
    /// Interval between periodic progress saves.
    pub progress_save_interval: Duration,
    /// Delay before a freshly attached episode is written to history, so a
    /// rapid sequence of switches does not spam the ledger.
    pub history_defer: Duration,
    /// Delay between natural end-of-stream and the autoplay advance.
    pub autoplay_delay: Duration,
    /// One-shot delay after attach before the slow-load hint fires.
    pub watchdog_delay: Duration,
    /// Unclassified fatal faults tolerated before one error is surfaced.
    pub fault_display_threshold: u32,
    /// Buffer-append failures before media-error recovery is forced.
    pub buffer_append_threshold: u32,
    /// Maximum entries retained in the watch-history ledger.
    pub history_limit: usize,
    /// Resume positions at or below this are rejected as too close to the start.
    pub min_resume_secs: f64,
    /// Resume positions within this margin of the duration are rejected.
    pub resume_end_margin_secs: f64,
    /// Positions below this are never persisted (cold-start protection).
    pub min_save_position_secs: f64,
    /// Minimum position/duration delta before a history entry is rewritten
    /// on the periodic sync path.
    pub history_sync_min_delta_secs: f64,
    /// A history upsert only overwrites a stored position when the new one
    /// exceeds this floor.
    pub history_position_floor_secs: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: EngineTuning::default(),
            progress_save_interval: Duration::from_secs(30),
            history_defer: Duration::from_secs(3),
            autoplay_delay: Duration::from_secs(1),
            watchdog_delay: Duration::from_secs(10),
            fault_display_threshold: 3,
            buffer_append_threshold: 3,
            history_limit: 50,
            min_resume_secs: 10.0,
            resume_end_margin_secs: 2.0,
            min_save_position_secs: 1.0,
            history_sync_min_delta_secs: 2.0,
            history_position_floor_secs: 10.0,
        }
    }
}

impl SessionConfig {
    pub fn with_engine(mut self, engine: EngineTuning) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_progress_save_interval(mut self, interval: Duration) -> Self {
        self.progress_save_interval = interval;
        self
    }

    pub fn with_history_defer(mut self, delay: Duration) -> Self {
        self.history_defer = delay;
        self
    }

    pub fn with_autoplay_delay(mut self, delay: Duration) -> Self {
        self.autoplay_delay = delay;
        self
    }

    pub fn with_watchdog_delay(mut self, delay: Duration) -> Self {
        self.watchdog_delay = delay;
        self
    }

    pub fn with_fault_display_threshold(mut self, threshold: u32) -> Self {
        self.fault_display_threshold = threshold;
        self
    }

    pub fn with_buffer_append_threshold(mut self, threshold: u32) -> Self {
        self.buffer_append_threshold = threshold;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }
}
