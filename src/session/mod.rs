//! Playback session control plane.
//!
//! [`StreamSession`] owns the engine attach/fault machine,
//! [`EpisodeNavigator`] owns the canonical episode index,
//! [`ResourceSwitcher`] moves between alternate catalogs, and
//! [`SessionOrchestrator`] composes them over one page view.

mod navigator;
mod orchestrator;
mod resource;
mod stream;

pub use navigator::{EpisodeNavigator, InitOutcome};
pub use orchestrator::{SessionContext, SessionError, SessionEvent, SessionOrchestrator};
pub use resource::{ResourceCandidate, ResourceSwitch, ResourceSwitcher, SwitchError};
pub use stream::{FaultAction, StreamSession};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::engine::StreamFault;

/// Lifecycle of one page view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    ResolvingSource,
    Attaching,
    Playing,
    Recovering,
    Ended,
    Failed,
}

impl SessionState {
    pub fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Init, ResolvingSource)
                | (Init, Failed)
                | (ResolvingSource, Attaching)
                | (ResolvingSource, Failed)
                | (Attaching, Playing)
                | (Attaching, Recovering)
                | (Attaching, Failed)
                | (Playing, Recovering)
                | (Playing, Ended)
                | (Playing, Attaching)
                | (Recovering, Playing)
                | (Recovering, Failed)
                | (Recovering, Attaching)
                | (Ended, Attaching)
                | (Failed, Attaching)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::ResolvingSource => write!(f, "resolving_source"),
            Self::Attaching => write!(f, "attaching"),
            Self::Playing => write!(f, "playing"),
            Self::Recovering => write!(f, "recovering"),
            Self::Ended => write!(f, "ended"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// Hooks surfaced to the presentation layer. The controller never renders;
/// it reports.
#[derive(Debug, Clone)]
pub enum PlayerNotice {
    ProgressSaved {
        position: f64,
        duration: f64,
    },
    EpisodeChanged {
        index: usize,
        url: String,
    },
    Fault(StreamFault),
    /// Exactly-once fatal error message for the current attach.
    PlaybackError {
        message: String,
    },
    PositionRestored {
        position: f64,
    },
    /// Watchdog hint: the load is slow but not abandoned.
    StillLoading,
    ExitFullscreen,
    Toast {
        level: NoticeLevel,
        message: String,
    },
}

pub fn notice_channel() -> (UnboundedSender<PlayerNotice>, UnboundedReceiver<PlayerNotice>) {
    unbounded_channel()
}
