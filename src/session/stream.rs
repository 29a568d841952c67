use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::engine::{FaultKind, StreamEngine, StreamFault};

use super::PlayerNotice;

/// What the session decided to do about a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultAction {
    /// Restart the manifest load without recreating the engine.
    RestartLoad,
    /// Invoke the engine's media-error recovery routine.
    RecoverMedia,
    /// Surface a user-visible error (at most once per attach).
    SurfaceError(String),
    Ignore,
}

/// Owner of the single live engine attach.
///
/// Attaching first tears down any previous instance, resets the per-attach
/// fault counters and issues a fresh generation token; deferred callbacks
/// capture the token so a stale timer can never act on a newer attach.
pub struct StreamSession {
    engine: Arc<dyn StreamEngine>,
    config: SessionConfig,
    notice_tx: Option<UnboundedSender<PlayerNotice>>,
    generation: Uuid,
    attached: bool,
    playback_started: bool,
    fault_count: u32,
    buffer_append_count: u32,
    error_surfaced: bool,
}

impl StreamSession {
    pub fn new(
        engine: Arc<dyn StreamEngine>,
        config: SessionConfig,
        notice_tx: Option<UnboundedSender<PlayerNotice>>,
    ) -> Self {
        Self {
            engine,
            config,
            notice_tx,
            generation: Uuid::new_v4(),
            attached: false,
            playback_started: false,
            fault_count: 0,
            buffer_append_count: 0,
            error_surfaced: false,
        }
    }

    /// Tear down any live attach and start a new one. Returns the generation
    /// token identifying this attach.
    pub async fn attach(&mut self, url: &str) -> Uuid {
        self.detach().await;
        self.generation = Uuid::new_v4();
        self.playback_started = false;
        self.fault_count = 0;
        self.buffer_append_count = 0;
        self.error_surfaced = false;
        info!(url, generation = %self.generation, "Attaching stream");
        if let Err(e) = self.engine.attach(url).await {
            warn!(url, error = %e, "Engine attach failed");
        }
        self.attached = true;
        self.generation
    }

    /// Idempotent teardown; engine errors are swallowed.
    pub async fn detach(&mut self) {
        if self.attached {
            self.engine.detach().await;
            self.attached = false;
        }
    }

    pub fn generation(&self) -> Uuid {
        self.generation
    }

    pub fn playback_started(&self) -> bool {
        self.playback_started
    }

    pub fn mark_playing(&mut self) {
        self.playback_started = true;
    }

    /// Request playback after the manifest parses. A rejected play (autoplay
    /// policy) is expected and swallowed.
    pub async fn request_play(&self) {
        if let Err(e) = self.engine.play().await {
            debug!(error = %e, "Play request rejected");
        }
    }

    pub async fn seek(&self, position: f64) {
        self.engine.seek(position).await;
    }

    /// Two-axis fault decision. Axis one: has playback started; a player
    /// already decoding frames does not surface cosmetic manifest errors.
    /// Axis two: the fault kind, only consulted for fatal faults before the
    /// first frame. Buffer-append failures are tracked independently and
    /// force media recovery once they repeat past the threshold.
    pub fn classify_fault(&mut self, fault: &StreamFault) -> FaultAction {
        self.fault_count += 1;

        if fault.is_buffer_append() {
            self.buffer_append_count += 1;
            if self.playback_started {
                return FaultAction::Ignore;
            }
            if self.buffer_append_count >= self.config.buffer_append_threshold {
                return FaultAction::RecoverMedia;
            }
        }

        if !fault.fatal || self.playback_started {
            return FaultAction::Ignore;
        }

        match fault.kind {
            FaultKind::Network => FaultAction::RestartLoad,
            FaultKind::Media => FaultAction::RecoverMedia,
            FaultKind::Other => {
                if self.fault_count > self.config.fault_display_threshold && !self.error_surfaced {
                    self.error_surfaced = true;
                    FaultAction::SurfaceError(
                        "Video failed to load: the format may be unsupported or the source unavailable"
                            .to_string(),
                    )
                } else {
                    FaultAction::Ignore
                }
            }
        }
    }

    /// Classify, apply the decided action on the engine, and report the
    /// fault to the presentation layer.
    pub async fn handle_fault(&mut self, fault: StreamFault) -> FaultAction {
        debug!(kind = %fault.kind, fatal = fault.fatal, detail = %fault.detail, "Stream fault");
        if let Some(ref tx) = self.notice_tx {
            let _ = tx.send(PlayerNotice::Fault(fault.clone()));
        }

        let action = self.classify_fault(&fault);
        match action {
            FaultAction::RestartLoad => self.engine.start_load().await,
            FaultAction::RecoverMedia => self.engine.recover_media_error().await,
            FaultAction::SurfaceError(_) | FaultAction::Ignore => {}
        }
        action
    }
}
