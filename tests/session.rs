use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use url::form_urlencoded;

use hls_session::engine::{EngineError, EngineEvent, FaultKind, StreamEngine, StreamFault};
use hls_session::search::{Episode, EpisodeSearch, SearchError, SearchHit};
use hls_session::storage::keys;
use hls_session::{
    notice_channel, AddressState, MemoryStorage, PlayerNotice, ProgressStore, SessionConfig,
    SessionEvent, SessionOrchestrator, SessionState, SourceCatalog, SourceSite, Storage,
    VideoIdentity,
};

#[derive(Debug, Clone, PartialEq)]
enum EngineCall {
    Attach(String),
    Detach,
    StartLoad,
    RecoverMedia,
    Play,
    Seek(f64),
}

#[derive(Default)]
struct ScriptedEngine {
    calls: Mutex<Vec<EngineCall>>,
}

impl ScriptedEngine {
    fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn attaches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Attach(url) => Some(url),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl StreamEngine for ScriptedEngine {
    async fn attach(&self, url: &str) -> Result<(), EngineError> {
        self.push(EngineCall::Attach(url.to_string()));
        Ok(())
    }
    async fn detach(&self) {
        self.push(EngineCall::Detach);
    }
    async fn start_load(&self) {
        self.push(EngineCall::StartLoad);
    }
    async fn recover_media_error(&self) {
        self.push(EngineCall::RecoverMedia);
    }
    async fn play(&self) -> Result<(), EngineError> {
        self.push(EngineCall::Play);
        Ok(())
    }
    async fn seek(&self, position: f64) {
        self.push(EngineCall::Seek(position));
    }
    async fn set_rate(&self, _rate: f64) {}
}

struct StubSearch {
    hits: HashMap<String, Vec<SearchHit>>,
}

#[async_trait]
impl EpisodeSearch for StubSearch {
    async fn search(&self, site: &SourceSite, _title: &str) -> Result<Vec<SearchHit>, SearchError> {
        Ok(self.hits.get(&site.key).cloned().unwrap_or_default())
    }
}

fn site(key: &str) -> SourceSite {
    SourceSite {
        key: key.to_string(),
        name: format!("{} VOD", key),
        api: format!("https://api.{}.example", key),
        detail: None,
        restricted: false,
    }
}

fn hit(urls: &[&str]) -> Vec<SearchHit> {
    vec![SearchHit {
        title: "Some Show".to_string(),
        episodes: urls
            .iter()
            .enumerate()
            .map(|(i, url)| Episode {
                url: url.to_string(),
                label: format!("EP{}", i + 1),
            })
            .collect(),
    }]
}

fn query(pairs: &[(&str, &str)]) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        ser.append_pair(k, v);
    }
    ser.finish()
}

fn episodes_json(urls: &[&str]) -> String {
    serde_json::to_string(&urls.to_vec()).unwrap()
}

struct Harness {
    orchestrator: SessionOrchestrator,
    engine: Arc<ScriptedEngine>,
    storage: Arc<MemoryStorage>,
    notices: UnboundedReceiver<PlayerNotice>,
}

fn harness(query_string: &str, hits: HashMap<String, Vec<SearchHit>>) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let engine = Arc::new(ScriptedEngine::default());
    let (tx, rx) = notice_channel();
    let address = AddressState::parse(&format!(
        "https://site.example/player.html?{}",
        query_string
    ))
    .unwrap();
    let orchestrator = SessionOrchestrator::new(
        SessionConfig::default(),
        Arc::clone(&storage) as Arc<dyn Storage>,
        Arc::clone(&engine) as Arc<dyn StreamEngine>,
        Arc::new(StubSearch { hits }),
        SourceCatalog::new(vec![site("alpha"), site("beta")]),
        address,
        Some(tx),
    );
    Harness {
        orchestrator,
        engine,
        storage,
        notices: rx,
    }
}

fn drain(rx: &mut UnboundedReceiver<PlayerNotice>) -> Vec<PlayerNotice> {
    let mut out = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        out.push(notice);
    }
    out
}

async fn flush_deferred(h: &mut Harness) {
    h.orchestrator
        .handle(SessionEvent::Tick {
            now: Utc::now() + ChronoDuration::hours(1),
        })
        .await;
}

#[tokio::test]
async fn load_repairs_out_of_range_index_and_rewrites_address() {
    let episodes = episodes_json(&["https://cdn/a.m3u8", "https://cdn/b.m3u8", "https://cdn/c.m3u8"]);
    let q = query(&[("title", "Some Show"), ("index", "5"), ("episodes", &episodes)]);
    let mut h = harness(&q, HashMap::new());

    h.orchestrator.load().await.unwrap();

    assert_eq!(h.orchestrator.navigator().current(), 2);
    assert_eq!(h.orchestrator.address().params().index, 2);
    assert_eq!(h.engine.attaches(), vec!["https://cdn/c.m3u8".to_string()]);
    assert_eq!(h.orchestrator.state(), SessionState::Attaching);
}

#[tokio::test]
async fn explicit_position_is_restored_when_inside_the_stream() {
    let q = query(&[
        ("url", "https://cdn/a.m3u8"),
        ("title", "Some Show"),
        ("position", "15"),
    ]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::LevelLoaded { duration: 100.0 }))
        .await;

    assert!(h.engine.calls().contains(&EngineCall::Seek(15.0)));
    let notices = drain(&mut h.notices);
    assert!(notices
        .iter()
        .any(|n| matches!(n, PlayerNotice::PositionRestored { position } if *position == 15.0)));
}

#[tokio::test]
async fn positions_near_either_edge_are_rejected() {
    for position in ["98", "5"] {
        let q = query(&[
            ("url", "https://cdn/a.m3u8"),
            ("title", "Some Show"),
            ("position", position),
        ]);
        let mut h = harness(&q, HashMap::new());
        h.orchestrator.load().await.unwrap();
        h.orchestrator
            .handle(SessionEvent::Engine(EngineEvent::LevelLoaded { duration: 100.0 }))
            .await;
        assert!(
            !h.engine.calls().iter().any(|c| matches!(c, EngineCall::Seek(_))),
            "position {} should have been rejected",
            position
        );
    }
}

#[tokio::test]
async fn stored_progress_is_restored_when_no_position_requested() {
    let q = query(&[("url", "https://cdn/a.m3u8"), ("title", "Some Show")]);
    let mut h = harness(&q, HashMap::new());

    let identity = VideoIdentity::derive(Some("https://cdn/a.m3u8"), "Some Show", 0);
    ProgressStore::new(Arc::clone(&h.storage) as Arc<dyn Storage>, 1.0)
        .save(&identity, 42.0, 100.0);

    h.orchestrator.load().await.unwrap();
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::LevelLoaded { duration: 100.0 }))
        .await;

    assert!(h.engine.calls().contains(&EngineCall::Seek(42.0)));
}

#[tokio::test]
async fn network_fatal_fault_before_first_frame_restarts_load() {
    let q = query(&[("url", "https://cdn/a.m3u8"), ("title", "Some Show")]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Fault(StreamFault::new(
            FaultKind::Network,
            true,
            "manifestLoadError",
        ))))
        .await;

    let calls = h.engine.calls();
    assert!(calls.contains(&EngineCall::StartLoad));
    assert!(!calls.contains(&EngineCall::RecoverMedia));
    assert_eq!(h.orchestrator.state(), SessionState::Recovering);
}

#[tokio::test]
async fn four_unclassified_faults_surface_exactly_one_error() {
    let q = query(&[("url", "https://cdn/a.m3u8"), ("title", "Some Show")]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    for _ in 0..4 {
        h.orchestrator
            .handle(SessionEvent::Engine(EngineEvent::Fault(StreamFault::new(
                FaultKind::Other,
                true,
                "unknown",
            ))))
            .await;
    }

    let errors = drain(&mut h.notices)
        .into_iter()
        .filter(|n| matches!(n, PlayerNotice::PlaybackError { .. }))
        .count();
    assert_eq!(errors, 1);
    assert_eq!(h.orchestrator.state(), SessionState::Failed);
}

#[tokio::test]
async fn faults_after_visible_playback_never_surface() {
    let q = query(&[("url", "https://cdn/a.m3u8"), ("title", "Some Show")]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Playing))
        .await;
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::TimeUpdate {
            position: 30.0,
            duration: 100.0,
        }))
        .await;
    for _ in 0..6 {
        h.orchestrator
            .handle(SessionEvent::Engine(EngineEvent::Fault(StreamFault::new(
                FaultKind::Other,
                true,
                "unknown",
            ))))
            .await;
    }

    assert!(!drain(&mut h.notices)
        .iter()
        .any(|n| matches!(n, PlayerNotice::PlaybackError { .. })));
    assert_eq!(h.orchestrator.state(), SessionState::Playing);
}

#[tokio::test]
async fn rapid_jumps_cancel_the_stale_history_write() {
    let episodes = episodes_json(&[
        "https://cdn/e0.m3u8",
        "https://cdn/e1.m3u8",
        "https://cdn/e2.m3u8",
        "https://cdn/e3.m3u8",
    ]);
    let q = query(&[("title", "Some Show"), ("index", "0"), ("episodes", &episodes)]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    assert!(h.orchestrator.jump(2).await);
    assert!(h.orchestrator.jump(3).await);
    flush_deferred(&mut h).await;

    let history = h.orchestrator.history_store().list();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].episode_index, Some(3));
}

#[tokio::test]
async fn jump_clears_stale_progress_for_the_target_episode() {
    let episodes = episodes_json(&["https://cdn/e0.m3u8", "https://cdn/e1.m3u8"]);
    let q = query(&[("title", "Some Show"), ("index", "0"), ("episodes", &episodes)]);
    let mut h = harness(&q, HashMap::new());

    let target = VideoIdentity::derive(Some("https://cdn/e1.m3u8"), "Some Show", 1);
    let progress = ProgressStore::new(Arc::clone(&h.storage) as Arc<dyn Storage>, 1.0);
    progress.save(&target, 500.0, 1200.0);

    h.orchestrator.load().await.unwrap();
    assert!(h.orchestrator.jump(1).await);

    assert!(progress.load(&target).is_none());
    assert_eq!(h.orchestrator.address().params().position, None);
    assert_eq!(h.orchestrator.address().params().index, 1);
}

#[tokio::test]
async fn jump_out_of_range_is_a_rejected_no_op() {
    let episodes = episodes_json(&["https://cdn/e0.m3u8", "https://cdn/e1.m3u8"]);
    let q = query(&[("title", "Some Show"), ("index", "0"), ("episodes", &episodes)]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    assert!(!h.orchestrator.jump(5).await);
    assert_eq!(h.orchestrator.navigator().current(), 0);
    assert_eq!(h.engine.attaches().len(), 1);
}

#[tokio::test]
async fn natural_end_clears_progress_and_autoplays_the_next_episode() {
    let episodes = episodes_json(&["https://cdn/e0.m3u8", "https://cdn/e1.m3u8"]);
    let q = query(&[("title", "Some Show"), ("index", "0"), ("episodes", &episodes)]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::LevelLoaded { duration: 100.0 }))
        .await;
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Playing))
        .await;
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::TimeUpdate {
            position: 99.0,
            duration: 100.0,
        }))
        .await;
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Ended))
        .await;

    let identity = VideoIdentity::derive(Some("https://cdn/e0.m3u8"), "Some Show", 0);
    assert!(h.orchestrator.progress_store().load(&identity).is_none());
    assert_eq!(h.orchestrator.state(), SessionState::Ended);

    flush_deferred(&mut h).await;
    assert_eq!(h.orchestrator.navigator().current(), 1);
    assert_eq!(h.engine.attaches().last().unwrap(), "https://cdn/e1.m3u8");
}

#[tokio::test]
async fn natural_end_without_next_episode_exits_fullscreen() {
    let episodes = episodes_json(&["https://cdn/e0.m3u8"]);
    let q = query(&[("title", "Some Show"), ("index", "0"), ("episodes", &episodes)]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Playing))
        .await;
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Ended))
        .await;
    flush_deferred(&mut h).await;

    assert!(drain(&mut h.notices)
        .iter()
        .any(|n| matches!(n, PlayerNotice::ExitFullscreen)));
    assert_eq!(h.orchestrator.navigator().current(), 0);
}

#[tokio::test]
async fn autoplay_disabled_stays_on_the_finished_episode() {
    let episodes = episodes_json(&["https://cdn/e0.m3u8", "https://cdn/e1.m3u8"]);
    let q = query(&[("title", "Some Show"), ("index", "0"), ("episodes", &episodes)]);
    let mut h = harness(&q, HashMap::new());
    h.storage.set(keys::AUTOPLAY, "false").unwrap();
    h.orchestrator.load().await.unwrap();

    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Playing))
        .await;
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Ended))
        .await;
    flush_deferred(&mut h).await;

    assert_eq!(h.orchestrator.navigator().current(), 0);
    assert_eq!(h.engine.attaches().len(), 1);
}

#[tokio::test]
async fn watchdog_reports_slow_load_without_cancelling() {
    let q = query(&[("url", "https://cdn/a.m3u8"), ("title", "Some Show")]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    flush_deferred(&mut h).await;

    assert!(drain(&mut h.notices)
        .iter()
        .any(|n| matches!(n, PlayerNotice::StillLoading)));
    assert_eq!(h.orchestrator.state(), SessionState::Attaching);
    assert!(!h.engine.calls().contains(&EngineCall::Detach));
}

#[tokio::test]
async fn deferred_history_write_lands_after_the_delay() {
    let episodes = episodes_json(&["https://cdn/e0.m3u8"]);
    let q = query(&[
        ("title", "Some Show"),
        ("source", "examplecdn"),
        ("id", "42"),
        ("episodes", &episodes),
    ]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    h.orchestrator
        .handle(SessionEvent::Tick { now: Utc::now() })
        .await;
    assert!(h.orchestrator.history_store().list().is_empty());

    flush_deferred(&mut h).await;
    let history = h.orchestrator.history_store().list();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].show_identifier, "examplecdn_42");
}

#[tokio::test]
async fn episode_list_supplemented_by_source_search() {
    let mut hits = HashMap::new();
    hits.insert(
        "alpha".to_string(),
        hit(&["https://cdn/e0.m3u8", "https://cdn/e1.m3u8", "https://cdn/e2.m3u8"]),
    );
    let q = query(&[
        ("url", "https://cdn/e1.m3u8"),
        ("title", "Some Show"),
        ("source_code", "alpha"),
        ("index", "1"),
    ]);
    let mut h = harness(&q, hits);
    h.orchestrator.load().await.unwrap();

    assert_eq!(h.orchestrator.navigator().len(), 3);
    assert_eq!(h.orchestrator.navigator().current(), 1);
    let stored: Option<Vec<String>> =
        hls_session::storage::get_json(h.storage.as_ref(), keys::EPISODES);
    assert_eq!(stored.map(|l| l.len()), Some(3));
}

#[tokio::test]
async fn switch_resource_falls_back_to_first_episode() {
    let mut hits = HashMap::new();
    hits.insert(
        "beta".to_string(),
        hit(&["https://beta.cdn/e0.m3u8", "https://beta.cdn/e1.m3u8"]),
    );
    let episodes = episodes_json(&[
        "https://cdn/e0.m3u8",
        "https://cdn/e1.m3u8",
        "https://cdn/e2.m3u8",
        "https://cdn/e3.m3u8",
        "https://cdn/e4.m3u8",
        "https://cdn/e5.m3u8",
        "https://cdn/e6.m3u8",
        "https://cdn/e7.m3u8",
    ]);
    let q = query(&[
        ("title", "Some Show"),
        ("source_code", "alpha"),
        ("index", "7"),
        ("episodes", &episodes),
    ]);
    let mut h = harness(&q, hits);
    h.orchestrator.load().await.unwrap();

    assert!(h.orchestrator.switch_resource("beta", 7).await);
    assert_eq!(h.orchestrator.navigator().current(), 0);
    assert_eq!(h.orchestrator.navigator().len(), 2);
    let params = h.orchestrator.address().params();
    assert_eq!(params.source_code.as_deref(), Some("beta"));
    assert_eq!(params.index, 0);
    assert_eq!(h.engine.attaches().last().unwrap(), "https://beta.cdn/e0.m3u8");
}

#[tokio::test]
async fn switch_resource_with_no_match_leaves_state_untouched() {
    let episodes = episodes_json(&["https://cdn/e0.m3u8", "https://cdn/e1.m3u8"]);
    let q = query(&[
        ("title", "Some Show"),
        ("source_code", "alpha"),
        ("index", "1"),
        ("episodes", &episodes),
    ]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    assert!(!h.orchestrator.switch_resource("beta", 0).await);
    assert_eq!(h.orchestrator.navigator().current(), 1);
    assert_eq!(h.orchestrator.navigator().len(), 2);
    assert_eq!(
        h.orchestrator.address().params().source_code.as_deref(),
        Some("alpha")
    );
    assert!(drain(&mut h.notices)
        .iter()
        .any(|n| matches!(n, PlayerNotice::Toast { .. })));
}

#[tokio::test]
async fn nested_player_reference_is_unwrapped_on_load() {
    let wrapped = format!(
        "player.html?{}",
        query(&[
            ("url", "https://cdn/real.m3u8"),
            ("position", "120"),
            ("title", "Some Show"),
        ])
    );
    let q = query(&[("url", &wrapped)]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    assert_eq!(h.engine.attaches(), vec!["https://cdn/real.m3u8".to_string()]);
    assert_eq!(h.orchestrator.context().title, "Some Show");
    assert_eq!(
        h.orchestrator.address().params().url.as_deref(),
        Some("https://cdn/real.m3u8")
    );
}

#[tokio::test]
async fn pause_and_page_hidden_persist_progress() {
    let q = query(&[("url", "https://cdn/a.m3u8"), ("title", "Some Show")]);
    let mut h = harness(&q, HashMap::new());
    h.orchestrator.load().await.unwrap();

    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Playing))
        .await;
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::TimeUpdate {
            position: 63.0,
            duration: 1200.0,
        }))
        .await;
    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::Paused))
        .await;

    let identity = VideoIdentity::derive(Some("https://cdn/a.m3u8"), "Some Show", 0);
    let record = h.orchestrator.progress_store().load(&identity).unwrap();
    assert_eq!(record.position, 63.0);

    h.orchestrator
        .handle(SessionEvent::Engine(EngineEvent::TimeUpdate {
            position: 80.0,
            duration: 1200.0,
        }))
        .await;
    h.orchestrator.handle(SessionEvent::PageHidden).await;
    let record = h.orchestrator.progress_store().load(&identity).unwrap();
    assert_eq!(record.position, 80.0);
}
