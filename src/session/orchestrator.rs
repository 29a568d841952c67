use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::address::{player_link, AddressError, AddressState};
use crate::config::SessionConfig;
use crate::engine::{EngineEvent, StreamEngine, StreamFault};
use crate::history::{HistoryEntry, HistoryStore};
use crate::identity::VideoIdentity;
use crate::progress::ProgressStore;
use crate::search::EpisodeSearch;
use crate::source::SourceCatalog;
use crate::storage::{self, keys, Storage};

use super::{
    EpisodeNavigator, FaultAction, NoticeLevel, PlayerNotice, ResourceCandidate, ResourceSwitcher,
    SessionState, StreamSession, SwitchError,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("no playable media URL")]
    MissingMediaUrl,
}

/// Everything controller components need to know about the current session,
/// owned here and handed out by reference instead of read from globals.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub title: String,
    pub video_url: Option<String>,
    pub source_name: String,
    pub source_code: String,
    pub vod_id: String,
    pub autoplay: bool,
    pub ad_filter: bool,
    /// The stream reached its natural end; saves stop until the next attach.
    pub ended: bool,
    pub position: f64,
    pub duration: f64,
    /// Explicit start position from the address, consumed on first use.
    pub requested_position: Option<f64>,
}

/// Events consumed by the session state machine. Timers and lifecycle hooks
/// arrive here as data; the orchestrator never reads ambient clocks beyond
/// stamping schedules.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Engine(EngineEvent),
    Tick { now: DateTime<Utc> },
    PageHidden,
    PageUnload,
    SetAutoplay(bool),
    SetAdFilter(bool),
    ToggleEpisodeOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredKind {
    HistoryWrite,
    AutoplayNext,
    Watchdog,
}

/// A cancelable one-shot. The token is the attach generation captured at
/// schedule time; a newer attach silently invalidates the callback.
#[derive(Debug, Clone)]
struct Deferred {
    due: DateTime<Utc>,
    token: Uuid,
    kind: DeferredKind,
}

/// Composition root for one page view: wires the address, the stores, the
/// stream session and the navigators, and runs the session state machine.
pub struct SessionOrchestrator {
    config: SessionConfig,
    storage: Arc<dyn Storage>,
    search: Arc<dyn EpisodeSearch>,
    progress: ProgressStore,
    history: HistoryStore,
    stream: StreamSession,
    navigator: EpisodeNavigator,
    switcher: ResourceSwitcher,
    address: AddressState,
    notice_tx: Option<UnboundedSender<PlayerNotice>>,
    state: SessionState,
    ctx: SessionContext,
    pending: Vec<Deferred>,
    next_progress_save: Option<DateTime<Utc>>,
}

impl SessionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SessionConfig,
        storage: Arc<dyn Storage>,
        engine: Arc<dyn StreamEngine>,
        search: Arc<dyn EpisodeSearch>,
        catalog: SourceCatalog,
        address: AddressState,
        notice_tx: Option<UnboundedSender<PlayerNotice>>,
    ) -> Self {
        let progress = ProgressStore::new(Arc::clone(&storage), config.min_save_position_secs);
        let history = HistoryStore::new(
            Arc::clone(&storage),
            config.history_limit,
            config.history_position_floor_secs,
            config.history_sync_min_delta_secs,
        );
        let stream = StreamSession::new(engine, config.clone(), notice_tx.clone());
        let switcher = ResourceSwitcher::new(catalog, Arc::clone(&search));
        Self {
            config,
            storage,
            search,
            progress,
            history,
            stream,
            navigator: EpisodeNavigator::new(),
            switcher,
            address,
            notice_tx,
            state: SessionState::Init,
            ctx: SessionContext::default(),
            pending: Vec::new(),
            next_progress_save: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn navigator(&self) -> &EpisodeNavigator {
        &self.navigator
    }

    pub fn address(&self) -> &AddressState {
        &self.address
    }

    pub fn history_store(&self) -> &HistoryStore {
        &self.history
    }

    pub fn progress_store(&self) -> &ProgressStore {
        &self.progress
    }

    /// Entry point: resolve the address into an attached stream.
    pub async fn load(&mut self) -> Result<(), SessionError> {
        if let Err(e) = self.address.unwrap_nested() {
            self.notify(PlayerNotice::PlaybackError {
                message: "Stored history link is invalid; return to the index and reopen"
                    .to_string(),
            });
            self.set_state(SessionState::Failed);
            return Err(e.into());
        }
        let params = self.address.params();

        self.ctx.title = params
            .title
            .clone()
            .or_else(|| self.storage.get(keys::CURRENT_TITLE))
            .unwrap_or_else(|| "Unknown video".to_string());
        self.ctx.video_url = params.url.clone();
        self.ctx.source_name = params.source_name.clone().unwrap_or_default();
        self.ctx.vod_id = params.vod_id.clone().unwrap_or_default();
        self.ctx.autoplay = storage::flag(self.storage.as_ref(), keys::AUTOPLAY, true);
        self.ctx.ad_filter = storage::flag(self.storage.as_ref(), keys::AD_FILTER, true);
        self.ctx.requested_position = params.position;

        let inferred = params.source_code.clone().or_else(|| {
            params
                .url
                .as_deref()
                .and_then(|u| self.switcher.catalog().infer_key(u))
                .map(String::from)
        });
        if params.source_code.is_none() {
            if let Some(ref code) = inferred {
                self.address.set_source_code(code);
            }
        }
        self.ctx.source_code = inferred.unwrap_or_default();

        if !self.ctx.vod_id.is_empty() && !self.ctx.source_name.is_empty() {
            let _ = self.storage.set(keys::PLAYING_ID, &self.ctx.vod_id);
            let _ = self.storage.set(keys::PLAYING_SOURCE, &self.ctx.source_name);
        }
        // Remembered for the host's return-to-previous-page flow.
        if let Some(ref back) = params.return_url {
            let _ = self.storage.set(keys::LAST_PAGE, back);
        }

        self.set_state(SessionState::ResolvingSource);

        let episodes = self.resolve_episode_list(params.episodes.clone()).await;
        self.navigator
            .set_reversed(storage::flag(self.storage.as_ref(), keys::REVERSED, false));
        let outcome = self.navigator.init(episodes, params.index as i64);
        if outcome.corrected {
            self.address.set_index(outcome.index);
        }

        let url = match self
            .ctx
            .video_url
            .clone()
            .or_else(|| self.navigator.current_url().map(String::from))
        {
            Some(url) => url,
            None => {
                self.notify(PlayerNotice::PlaybackError {
                    message: "Invalid video link".to_string(),
                });
                self.set_state(SessionState::Failed);
                return Err(SessionError::MissingMediaUrl);
            }
        };
        self.ctx.video_url = Some(url.clone());

        self.set_state(SessionState::Attaching);
        self.attach_current(&url).await;
        info!(title = %self.ctx.title, index = self.navigator.current(), "Session loaded");
        Ok(())
    }

    /// Episode list precedence: explicitly supplied, else a fresh search
    /// against the active source, else the last-known list from storage.
    async fn resolve_episode_list(&mut self, explicit: Option<Vec<String>>) -> Vec<String> {
        if let Some(list) = explicit {
            if !list.is_empty() {
                storage::set_json(self.storage.as_ref(), keys::EPISODES, &list);
                return list;
            }
        }

        if !self.ctx.source_code.is_empty() && !self.ctx.title.is_empty() {
            if let Some(site) = self.switcher.catalog().get(&self.ctx.source_code).cloned() {
                match self.search.search(&site, &self.ctx.title).await {
                    Ok(hits) => {
                        if let Some(hit) = hits.first() {
                            let list: Vec<String> =
                                hit.episodes.iter().map(|e| e.url.clone()).collect();
                            if !list.is_empty() {
                                storage::set_json(self.storage.as_ref(), keys::EPISODES, &list);
                                return list;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(source = %site.key, error = %e, "Episode list search failed");
                    }
                }
            }
        }

        storage::get_json(self.storage.as_ref(), keys::EPISODES).unwrap_or_default()
    }

    pub async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Engine(ev) => self.handle_engine_event(ev).await,
            SessionEvent::Tick { now } => self.handle_tick(now).await,
            SessionEvent::PageHidden | SessionEvent::PageUnload => self.save_progress(),
            SessionEvent::SetAutoplay(on) => {
                self.ctx.autoplay = on;
                storage::set_flag(self.storage.as_ref(), keys::AUTOPLAY, on);
            }
            SessionEvent::SetAdFilter(on) => {
                self.ctx.ad_filter = on;
                storage::set_flag(self.storage.as_ref(), keys::AD_FILTER, on);
            }
            SessionEvent::ToggleEpisodeOrder => {
                let reversed = self.navigator.toggle_reversed();
                storage::set_flag(self.storage.as_ref(), keys::REVERSED, reversed);
            }
        }
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ManifestParsed { levels } => {
                debug!(levels, "Manifest parsed");
                self.stream.request_play().await;
            }
            EngineEvent::LevelLoaded { duration } => {
                self.ctx.duration = duration;
                self.ctx.ended = false;
                let stored = self.progress.load(&self.identity()).map(|p| p.position);
                if let Some(target) = initial_seek(
                    self.ctx.requested_position,
                    stored,
                    duration,
                    self.config.min_resume_secs,
                    self.config.resume_end_margin_secs,
                ) {
                    self.stream.seek(target).await;
                    self.notify(PlayerNotice::PositionRestored { position: target });
                }
                self.ctx.requested_position = None;
            }
            EngineEvent::FragLoaded => {}
            EngineEvent::Playing => {
                self.stream.mark_playing();
                if matches!(self.state, SessionState::Attaching | SessionState::Recovering) {
                    self.set_state(SessionState::Playing);
                }
            }
            EngineEvent::TimeUpdate { position, duration } => {
                self.ctx.position = position;
                if duration > 0.0 {
                    self.ctx.duration = duration;
                }
            }
            EngineEvent::Paused => self.save_progress(),
            EngineEvent::Ended => self.handle_ended(),
            EngineEvent::Fault(fault) => self.handle_fault(fault).await,
        }
    }

    fn handle_ended(&mut self) {
        self.ctx.ended = true;
        // Fully watched: the next visit restarts from the beginning.
        self.progress.clear(&self.identity());
        if self.ctx.autoplay && self.navigator.has_next() {
            let token = self.stream.generation();
            self.schedule(Utc::now(), self.config.autoplay_delay, token, DeferredKind::AutoplayNext);
        } else {
            self.notify(PlayerNotice::ExitFullscreen);
        }
        self.set_state(SessionState::Ended);
    }

    async fn handle_fault(&mut self, fault: StreamFault) {
        let visible = self.ctx.position > 1.0;
        let action = self.stream.handle_fault(fault).await;
        match action {
            FaultAction::SurfaceError(message) => {
                if !visible {
                    self.notify(PlayerNotice::PlaybackError { message });
                    self.set_state(SessionState::Failed);
                }
            }
            FaultAction::RestartLoad | FaultAction::RecoverMedia => {
                if self.state == SessionState::Attaching {
                    self.set_state(SessionState::Recovering);
                }
            }
            FaultAction::Ignore => {}
        }
    }

    async fn handle_tick(&mut self, now: DateTime<Utc>) {
        if let Some(due) = self.next_progress_save {
            if now >= due && self.state == SessionState::Playing {
                self.save_progress();
                self.next_progress_save = Some(now + chrono_delay(self.config.progress_save_interval));
            }
        }
        self.run_due(now).await;
    }

    async fn run_due(&mut self, now: DateTime<Utc>) {
        let current = self.stream.generation();
        let mut due = Vec::new();
        self.pending.retain(|d| {
            if d.due <= now {
                due.push(d.clone());
                false
            } else {
                true
            }
        });

        for deferred in due {
            if deferred.token != current {
                debug!(kind = ?deferred.kind, "Dropping stale deferred action");
                continue;
            }
            match deferred.kind {
                DeferredKind::HistoryWrite => self.write_history(),
                DeferredKind::AutoplayNext => {
                    if self.ctx.autoplay {
                        if let Some(next) = self.navigator.next_index() {
                            self.jump(next).await;
                        }
                    }
                }
                DeferredKind::Watchdog => {
                    if !self.stream.playback_started() {
                        self.notify(PlayerNotice::StillLoading);
                    }
                }
            }
        }
    }

    /// Switch to the episode at `index`. Rejected (returns false) when the
    /// index is out of range. Progress for the outgoing episode is persisted
    /// synchronously before the detach; any stored position for the target
    /// is cleared so a fresh episode never inherits a stray resume point.
    pub async fn jump(&mut self, index: usize) -> bool {
        if !self.navigator.is_valid(index) {
            return false;
        }
        if !self.ctx.ended {
            self.save_progress();
        }

        let url = match self.navigator.jump(index) {
            Some(url) => url.to_string(),
            None => return false,
        };
        self.ctx.video_url = Some(url.clone());
        self.ctx.ended = false;
        self.ctx.position = 0.0;
        self.ctx.duration = 0.0;
        self.ctx.requested_position = None;
        self.progress.clear(&self.identity());
        self.address.set_episode(index, &url);

        self.set_state(SessionState::Attaching);
        self.attach_current(&url).await;
        self.notify(PlayerNotice::EpisodeChanged { index, url });
        true
    }

    pub async fn next(&mut self) -> bool {
        match self.navigator.next_index() {
            Some(index) => self.jump(index).await,
            None => false,
        }
    }

    pub async fn previous(&mut self) -> bool {
        match self.navigator.previous_index() {
            Some(index) => self.jump(index).await,
            None => false,
        }
    }

    pub async fn list_resource_candidates(&self) -> Vec<ResourceCandidate> {
        let active = if self.ctx.source_code.is_empty() {
            None
        } else {
            Some(self.ctx.source_code.as_str())
        };
        self.switcher.list_candidates(&self.ctx.title, active).await
    }

    /// Move to an alternate source: title, source and episode list change
    /// atomically. On any failure the current state is left untouched and a
    /// transient notice is raised.
    pub async fn switch_resource(&mut self, key: &str, preferred_index: usize) -> bool {
        let switch = match self
            .switcher
            .resolve_switch(key, &self.ctx.title, preferred_index)
            .await
        {
            Ok(switch) => switch,
            Err(SwitchError::NoMatch { .. }) => {
                self.notify(PlayerNotice::Toast {
                    level: NoticeLevel::Warning,
                    message: "No matching resource found".to_string(),
                });
                return false;
            }
            Err(e) => {
                warn!(source = key, error = %e, "Resource switch failed");
                self.notify(PlayerNotice::Toast {
                    level: NoticeLevel::Error,
                    message: "Resource search failed".to_string(),
                });
                return false;
            }
        };

        if !self.ctx.ended {
            self.save_progress();
        }

        self.ctx.title = switch.title.clone();
        self.ctx.source_code = switch.source_code.clone();
        self.ctx.source_name = self
            .switcher
            .catalog()
            .get(key)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        self.ctx.vod_id.clear();
        self.navigator.init(switch.episodes.clone(), switch.index as i64);
        storage::set_json(self.storage.as_ref(), keys::EPISODES, &switch.episodes);
        let _ = self.storage.set(keys::CURRENT_TITLE, &switch.title);

        self.ctx.video_url = Some(switch.url.clone());
        self.ctx.ended = false;
        self.ctx.position = 0.0;
        self.ctx.duration = 0.0;
        self.ctx.requested_position = None;
        self.progress.clear(&self.identity());
        self.address
            .set_resource(&switch.title, &switch.source_code, switch.index, &switch.url);

        self.set_state(SessionState::Attaching);
        self.attach_current(&switch.url).await;
        self.notify(PlayerNotice::EpisodeChanged {
            index: switch.index,
            url: switch.url,
        });
        true
    }

    async fn attach_current(&mut self, url: &str) {
        let token = self.stream.attach(url).await;
        // A new attach invalidates everything scheduled against the old one.
        self.pending.clear();
        let now = Utc::now();
        self.schedule(now, self.config.watchdog_delay, token, DeferredKind::Watchdog);
        self.schedule(now, self.config.history_defer, token, DeferredKind::HistoryWrite);
        self.next_progress_save = Some(now + chrono_delay(self.config.progress_save_interval));
    }

    fn schedule(
        &mut self,
        now: DateTime<Utc>,
        delay: std::time::Duration,
        token: Uuid,
        kind: DeferredKind,
    ) {
        self.pending.push(Deferred {
            due: now + chrono_delay(delay),
            token,
            kind,
        });
    }

    fn identity(&self) -> VideoIdentity {
        VideoIdentity::derive(
            self.ctx.video_url.as_deref(),
            &self.ctx.title,
            self.navigator.current(),
        )
    }

    fn save_progress(&mut self) {
        if self.ctx.ended {
            return;
        }
        let identity = self.identity();
        if self
            .progress
            .save(&identity, self.ctx.position, self.ctx.duration)
        {
            self.history.sync_progress(
                &self.ctx.title,
                self.navigator.current(),
                self.ctx.position,
                self.ctx.duration,
            );
            self.notify(PlayerNotice::ProgressSaved {
                position: self.ctx.position,
                duration: self.ctx.duration,
            });
        }
    }

    fn write_history(&mut self) {
        let Some(url) = self.ctx.video_url.clone() else {
            return;
        };
        if self.navigator.is_empty() {
            return;
        }
        let episodes = self.navigator.episodes().to_vec();
        let show_identifier = HistoryEntry::show_identifier(
            &self.ctx.source_name,
            &self.ctx.vod_id,
            &episodes,
            &url,
        );
        let player_url = player_link(
            &url,
            &self.ctx.title,
            &self.ctx.source_name,
            &self.ctx.source_code,
            &self.ctx.vod_id,
            self.navigator.current(),
            self.ctx.position,
        );
        self.history.upsert(HistoryEntry {
            title: self.ctx.title.clone(),
            direct_video_url: url,
            player_url,
            episode_index: Some(self.navigator.current()),
            source_name: self.ctx.source_name.clone(),
            source_code: self.ctx.source_code.clone(),
            vod_id: self.ctx.vod_id.clone(),
            show_identifier,
            timestamp: Utc::now().timestamp_millis(),
            playback_position: self.ctx.position,
            duration: self.ctx.duration,
            episodes,
        });
    }

    fn set_state(&mut self, target: SessionState) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(target) {
            warn!(from = %self.state, to = %target, "Refusing invalid session state transition");
            return;
        }
        debug!(from = %self.state, to = %target, "Session state change");
        self.state = target;
    }

    fn notify(&self, notice: PlayerNotice) {
        if let Some(ref tx) = self.notice_tx {
            let _ = tx.send(notice);
        }
    }
}

fn chrono_delay(delay: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Pick the initial seek target. An explicit request wins over a stored
/// record, but either is honored only when it is comfortably inside the
/// stream: past the resume minimum and clear of the final margin.
fn initial_seek(
    requested: Option<f64>,
    stored: Option<f64>,
    duration: f64,
    min_resume: f64,
    end_margin: f64,
) -> Option<f64> {
    if duration <= 0.0 {
        return None;
    }
    let valid = |p: f64| p > min_resume && p < duration - end_margin;
    if let Some(p) = requested {
        if valid(p) {
            return Some(p);
        }
    }
    stored.filter(|&p| valid(p))
}
