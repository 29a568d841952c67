#![forbid(unsafe_code)]

pub mod address;
pub mod config;
pub mod engine;
pub mod filter;
pub mod history;
pub mod identity;
pub mod progress;
pub mod search;
pub mod session;
pub mod source;
pub mod storage;

pub use address::{AddressError, AddressState, PlayerParams};
pub use config::{EngineTuning, SessionConfig};
pub use engine::{EngineError, EngineEvent, FaultKind, HlsEngine, StreamEngine, StreamFault};
pub use history::{HistoryEntry, HistoryStore};
pub use identity::VideoIdentity;
pub use progress::{PlaybackProgress, ProgressStore};
pub use search::{Episode, EpisodeSearch, HttpSearch, SearchError, SearchHit};
pub use session::{
    notice_channel, EpisodeNavigator, FaultAction, InitOutcome, NoticeLevel, PlayerNotice,
    ResourceCandidate, ResourceSwitch, ResourceSwitcher, SessionContext, SessionError,
    SessionEvent, SessionOrchestrator, SessionState, StreamSession, SwitchError,
};
pub use source::{ResolvePolicy, SourceCatalog, SourceSite};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
