use std::sync::Arc;
use std::time::Duration;

use m3u8_rs::Playlist;
use rand::Rng;
use reqwest::Client;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EngineTuning;

use super::{EngineError, EngineEvent, FaultKind, StreamEngine, StreamFault};

/// Hook run over manifest/level response text before parsing.
pub type ManifestInterceptor = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Control-plane HLS engine: fetches and parses manifests with bounded,
/// per-request-class retries, and reports classified faults. Media decode
/// happens in the embedding host; decode-side events are injected there.
pub struct HlsEngine {
    client: Client,
    tuning: EngineTuning,
    interceptor: Option<ManifestInterceptor>,
    tx: UnboundedSender<EngineEvent>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    url: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl HlsEngine {
    pub fn new(
        tuning: EngineTuning,
        interceptor: Option<ManifestInterceptor>,
        tx: UnboundedSender<EngineEvent>,
    ) -> Self {
        let client = Client::builder()
            .timeout(tuning.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            tuning,
            interceptor,
            tx,
            inner: Mutex::new(Inner::default()),
        }
    }

    async fn spawn_load(&self, inner: &mut Inner, url: String) {
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.url = Some(url.clone());

        let client = self.client.clone();
        let tuning = self.tuning.clone();
        let interceptor = self.interceptor.clone();
        let tx = self.tx.clone();
        inner.task = Some(tokio::spawn(async move {
            run_load(client, tuning, interceptor, tx, url).await;
        }));
    }
}

#[async_trait::async_trait]
impl StreamEngine for HlsEngine {
    async fn attach(&self, url: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        debug!(url, "Attaching engine");
        self.spawn_load(&mut inner, url.to_string()).await;
        Ok(())
    }

    async fn detach(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.url = None;
    }

    async fn start_load(&self) {
        let mut inner = self.inner.lock().await;
        let Some(url) = inner.url.clone() else {
            return;
        };
        debug!(url, "Restarting manifest load");
        self.spawn_load(&mut inner, url).await;
    }

    async fn recover_media_error(&self) {
        // Decode-side buffers live in the host; nothing to rebuild here.
        debug!("Media error recovery requested");
    }

    async fn play(&self) -> Result<(), EngineError> {
        let inner = self.inner.lock().await;
        if inner.url.is_none() {
            return Err(EngineError::NotAttached);
        }
        Ok(())
    }

    async fn seek(&self, position: f64) {
        debug!(position, "Seek requested");
    }

    async fn set_rate(&self, rate: f64) {
        debug!(rate, "Rate change requested");
    }
}

async fn run_load(
    client: Client,
    tuning: EngineTuning,
    interceptor: Option<ManifestInterceptor>,
    tx: UnboundedSender<EngineEvent>,
    url: String,
) {
    let body = match fetch_text(
        &client,
        &url,
        tuning.manifest_max_retries,
        tuning.manifest_retry_delay,
    )
    .await
    {
        Ok(body) => body,
        Err(detail) => {
            let _ = tx.send(EngineEvent::Fault(StreamFault::new(
                FaultKind::Network,
                true,
                detail,
            )));
            return;
        }
    };
    let body = apply(&interceptor, body);

    match m3u8_rs::parse_playlist(body.as_bytes()) {
        Ok((_, Playlist::MasterPlaylist(master))) => {
            let _ = tx.send(EngineEvent::ManifestParsed {
                levels: master.variants.len(),
            });
            let Some(variant) = master.variants.first() else {
                let _ = tx.send(EngineEvent::Fault(StreamFault::new(
                    FaultKind::Other,
                    true,
                    "manifest has no variant streams",
                )));
                return;
            };
            let level_url = resolve_uri(&url, &variant.uri);
            load_level(&client, &tuning, &interceptor, &tx, &level_url).await;
        }
        Ok((_, Playlist::MediaPlaylist(media))) => {
            let _ = tx.send(EngineEvent::ManifestParsed { levels: 1 });
            let _ = tx.send(EngineEvent::LevelLoaded {
                duration: playlist_duration(&media),
            });
        }
        Err(e) => {
            warn!(url, error = %e, "Manifest parse failed");
            let _ = tx.send(EngineEvent::Fault(StreamFault::new(
                FaultKind::Other,
                true,
                "manifestParsingError",
            )));
        }
    }
}

async fn load_level(
    client: &Client,
    tuning: &EngineTuning,
    interceptor: &Option<ManifestInterceptor>,
    tx: &UnboundedSender<EngineEvent>,
    url: &str,
) {
    let body = match fetch_text(client, url, tuning.level_max_retries, tuning.level_retry_delay)
        .await
    {
        Ok(body) => body,
        Err(detail) => {
            let _ = tx.send(EngineEvent::Fault(StreamFault::new(
                FaultKind::Network,
                true,
                detail,
            )));
            return;
        }
    };
    let body = apply(interceptor, body);

    match m3u8_rs::parse_media_playlist_res(body.as_bytes()) {
        Ok(media) => {
            let _ = tx.send(EngineEvent::LevelLoaded {
                duration: playlist_duration(&media),
            });
        }
        Err(e) => {
            warn!(url, error = %e, "Level parse failed");
            let _ = tx.send(EngineEvent::Fault(StreamFault::new(
                FaultKind::Other,
                true,
                "levelParsingError",
            )));
        }
    }
}

fn apply(interceptor: &Option<ManifestInterceptor>, body: String) -> String {
    match interceptor {
        Some(f) => f(body),
        None => body,
    }
}

fn playlist_duration(media: &m3u8_rs::MediaPlaylist) -> f64 {
    media.segments.iter().map(|s| s.duration as f64).sum()
}

async fn fetch_text(
    client: &Client,
    url: &str,
    max_retries: u32,
    base_delay: Duration,
) -> Result<String, String> {
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = base_delay * 2u32.saturating_pow(attempt - 1);
            let jitter_range = (backoff.as_millis() / 7) as u64;
            let jitter = if jitter_range > 0 {
                rand::thread_rng().gen_range(0..jitter_range)
            } else {
                0
            };
            debug!(url, attempt, backoff_ms = backoff.as_millis(), "Retrying fetch");
            tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.text().await {
                        Ok(body) => return Ok(body),
                        Err(e) => last_error = e.to_string(),
                    }
                } else {
                    last_error = format!("HTTP {} fetching {}", status.as_u16(), url);
                    warn!(url, status = status.as_u16(), attempt, "Fetch returned error status");
                    if status.is_client_error() && status.as_u16() != 429 {
                        return Err(last_error);
                    }
                }
            }
            Err(e) => {
                warn!(url, attempt, error = %e, "Fetch network error");
                last_error = e.to_string();
            }
        }
    }

    Err(last_error)
}

/// Resolve a possibly-relative playlist URI against its master's location.
fn resolve_uri(base: &str, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    match base.rfind('/') {
        Some(idx) => format!("{}/{}", &base[..idx], uri),
        None => uri.to_string(),
    }
}
