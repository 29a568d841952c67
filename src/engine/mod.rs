//! Streaming engine capability surface.
//!
//! The controller drives any adaptive-streaming engine through this trait;
//! the engine pushes events back through an unbounded channel. [`HlsEngine`]
//! is the control-plane implementation used by the CLI; tests drive the
//! session with scripted fakes.

mod hls;

pub use hls::{HlsEngine, ManifestInterceptor};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Fault detail reported when a media buffer rejects an appended segment.
pub const BUFFER_APPEND_ERROR: &str = "bufferAppendError";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no media attached")]
    NotAttached,
    #[error("engine rejected play request: {0}")]
    PlayRejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Network,
    Media,
    Other,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Media => write!(f, "media"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Classified transport/media error attached to one engine attach. Not
/// persisted; lives only for the duration of the session that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFault {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: FaultKind,
    pub fatal: bool,
    pub detail: String,
}

impl StreamFault {
    pub fn new(kind: FaultKind, fatal: bool, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            fatal,
            detail: detail.into(),
        }
    }

    pub fn is_buffer_append(&self) -> bool {
        self.detail == BUFFER_APPEND_ERROR
    }
}

/// Events emitted by an attached engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Master manifest fetched and parsed; playback may be requested.
    ManifestParsed { levels: usize },
    /// A level/quality playlist loaded; the media duration is now known.
    LevelLoaded { duration: f64 },
    FragLoaded,
    /// First decoded frames are rendering.
    Playing,
    TimeUpdate { position: f64, duration: f64 },
    Paused,
    /// The stream reached its natural end.
    Ended,
    Fault(StreamFault),
}

pub fn engine_channel() -> (UnboundedSender<EngineEvent>, UnboundedReceiver<EngineEvent>) {
    unbounded_channel()
}

/// Decoder/demuxer control surface. One attach at a time; `detach` is
/// idempotent and never fails.
#[async_trait]
pub trait StreamEngine: Send + Sync {
    async fn attach(&self, url: &str) -> Result<(), EngineError>;
    async fn detach(&self);
    /// Restart the manifest load without recreating the engine.
    async fn start_load(&self);
    /// Attempt in-place recovery from a media/decode fault.
    async fn recover_media_error(&self);
    async fn play(&self) -> Result<(), EngineError>;
    async fn seek(&self, position: f64);
    async fn set_rate(&self, rate: f64);
}
