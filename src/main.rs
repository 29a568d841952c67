use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use hls_session::engine::{engine_channel, ManifestInterceptor};
use hls_session::filter::strip_boundary_markers;
use hls_session::storage::{self, keys};
use hls_session::source::{host_fallback, resolve_source_name};
use hls_session::{
    notice_channel, AddressState, EngineEvent, FileStorage, HistoryStore, HlsEngine, HttpSearch,
    NoticeLevel, PlayerNotice, ResolvePolicy, ResourceSwitcher, SessionConfig, SessionEvent,
    SessionOrchestrator, SessionState, SourceCatalog, SourceSite, Storage,
};

/// Playback session controller for segmented-video streams.
#[derive(Parser)]
#[command(name = "hls-session", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach a stream and run a headless playback session.
    Play {
        /// Media URL (m3u8) or a nested player reference.
        url: String,

        #[arg(long)]
        title: Option<String>,

        /// Source key from the config catalog.
        #[arg(long)]
        source: Option<String>,

        /// Episode index within the list.
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Start position in seconds (overrides any stored progress).
        #[arg(long)]
        position: Option<u64>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the watch-history ledger, most recent first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List alternate sources carrying a title, with live episode counts.
    Sources {
        title: String,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Delete the watch-history ledger.
    ClearHistory {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct AppConfig {
    #[serde(default)]
    storage_path: Option<PathBuf>,

    #[serde(default)]
    search_path: Option<String>,

    #[serde(default, rename = "source")]
    sources: Vec<SourceSite>,
}

impl AppConfig {
    fn load(path: Option<&PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!(
                        "{} failed to parse {}: {}",
                        style("error:").red().bold(),
                        path.display(),
                        e
                    );
                    std::process::exit(2);
                }
            },
            Err(e) => {
                eprintln!(
                    "{} failed to read {}: {}",
                    style("error:").red().bold(),
                    path.display(),
                    e
                );
                std::process::exit(2);
            }
        }
    }

    fn storage(&self) -> Arc<dyn Storage> {
        let path = self
            .storage_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("hls-session-state.json"));
        Arc::new(FileStorage::open(path))
    }

    fn search(&self) -> HttpSearch {
        let search = HttpSearch::default();
        match self.search_path {
            Some(ref path) => search.with_search_path(path.clone()),
            None => search,
        }
    }

    fn catalog(&self) -> SourceCatalog {
        SourceCatalog::new(self.sources.clone())
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            url,
            title,
            source,
            index,
            position,
            config,
        } => run_play(url, title, source, index, position, config).await,
        Commands::History { limit, config } => run_history(limit, config),
        Commands::Sources { title, config } => run_sources(title, config).await,
        Commands::ClearHistory { config } => {
            let app = AppConfig::load(config.as_ref());
            history_store(&app).clear();
            println!("{}", style("Watch history cleared").green());
        }
    }
}

fn history_store(app: &AppConfig) -> HistoryStore {
    let config = SessionConfig::default();
    HistoryStore::new(
        app.storage(),
        config.history_limit,
        config.history_position_floor_secs,
        config.history_sync_min_delta_secs,
    )
}

fn player_address(
    url: &str,
    title: Option<&str>,
    source: Option<&str>,
    index: usize,
    position: Option<u64>,
) -> AddressState {
    let mut pairs: Vec<(&str, String)> = vec![("url", url.to_string())];
    if let Some(title) = title {
        pairs.push(("title", title.to_string()));
    }
    if let Some(source) = source {
        pairs.push(("source_code", source.to_string()));
    }
    pairs.push(("index", index.to_string()));
    if let Some(position) = position {
        pairs.push(("position", position.to_string()));
    }
    let href = Url::parse_with_params("app://player/", &pairs).expect("static player address");
    AddressState::parse(href.as_str()).expect("static player address")
}

async fn run_play(
    url: String,
    title: Option<String>,
    source: Option<String>,
    index: usize,
    position: Option<u64>,
    config: Option<PathBuf>,
) {
    let app = AppConfig::load(config.as_ref());
    let storage = app.storage();
    let session_config = SessionConfig::default();

    let ad_filter = storage::flag(storage.as_ref(), keys::AD_FILTER, true);
    let interceptor: Option<ManifestInterceptor> = if ad_filter {
        Some(Arc::new(|body: String| strip_boundary_markers(&body)))
    } else {
        None
    };

    let (engine_tx, mut engine_rx) = engine_channel();
    let engine = Arc::new(HlsEngine::new(
        session_config.engine.clone(),
        interceptor,
        engine_tx,
    ));
    let (notice_tx, mut notice_rx) = notice_channel();

    let address = player_address(&url, title.as_deref(), source.as_deref(), index, position);
    let mut orchestrator = SessionOrchestrator::new(
        session_config,
        storage,
        engine,
        Arc::new(app.search()),
        app.catalog(),
        address,
        Some(notice_tx),
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static spinner template"),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("Loading manifest...");

    if let Err(e) = orchestrator.load().await {
        spinner.finish_and_clear();
        drain_notices(&mut notice_rx);
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }

    {
        let ctx = orchestrator.context();
        let source_label = resolve_source_name(
            &app.catalog(),
            &ResolvePolicy::default(),
            (!ctx.source_code.is_empty()).then_some(ctx.source_code.as_str()),
            ctx.video_url.as_deref(),
            Some(&ctx.title),
            &[],
        )
        .or_else(|| ctx.video_url.as_deref().and_then(host_fallback))
        .unwrap_or_else(|| "unknown source".to_string());
        spinner.println(format!(
            "{} {} via {} ({} episodes)",
            style("session").bold(),
            ctx.title,
            source_label,
            orchestrator.navigator().len().max(1)
        ));
    }

    // Headless playhead: the CLI stands in for the decode side, advancing
    // the position once per second so progress and history bookkeeping run
    // against real wall-clock time.
    let mut playhead: f64 = 0.0;
    let mut playing = false;
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            event = engine_rx.recv() => {
                let Some(event) = event else { break };
                if let EngineEvent::LevelLoaded { duration } = event {
                    spinner.set_message(format!("Manifest ready ({:.0}s)", duration));
                }
                orchestrator.handle(SessionEvent::Engine(event)).await;
            }
            _ = interval.tick() => {
                let duration = orchestrator.context().duration;
                if !playing && duration > 0.0 && orchestrator.state() == SessionState::Attaching {
                    playing = true;
                    playhead = orchestrator.context().position;
                    spinner.finish_and_clear();
                    println!(
                        "{} {} ({:.0}s)",
                        style("playing").green().bold(),
                        orchestrator.context().title,
                        duration
                    );
                    orchestrator.handle(SessionEvent::Engine(EngineEvent::Playing)).await;
                }
                if playing && orchestrator.state() == SessionState::Playing {
                    playhead += 1.0;
                    if playhead >= duration {
                        orchestrator.handle(SessionEvent::Engine(EngineEvent::Ended)).await;
                        playing = false;
                        playhead = 0.0;
                    } else {
                        orchestrator.handle(SessionEvent::Engine(EngineEvent::TimeUpdate {
                            position: playhead,
                            duration,
                        })).await;
                    }
                }
                orchestrator.handle(SessionEvent::Tick { now: Utc::now() }).await;
                if orchestrator.state() == SessionState::Ended && !orchestrator.navigator().has_next() {
                    break;
                }
                if orchestrator.state() == SessionState::Failed {
                    break;
                }
            }
            notice = notice_rx.recv() => {
                if let Some(notice) = notice {
                    render_notice(&notice);
                    match notice {
                        PlayerNotice::EpisodeChanged { .. } => {
                            playing = false;
                            playhead = 0.0;
                            spinner.set_message("Loading manifest...");
                        }
                        PlayerNotice::PositionRestored { position } => {
                            playhead = position;
                        }
                        _ => {}
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.handle(SessionEvent::PageUnload).await;
                println!();
                break;
            }
        }
    }

    spinner.finish_and_clear();
    drain_notices(&mut notice_rx);
}

fn drain_notices(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PlayerNotice>) {
    while let Ok(notice) = rx.try_recv() {
        render_notice(&notice);
    }
}

fn render_notice(notice: &PlayerNotice) {
    match notice {
        PlayerNotice::ProgressSaved { position, duration } => {
            println!(
                "{} {:.0}s / {:.0}s",
                style("progress saved").dim(),
                position,
                duration
            );
        }
        PlayerNotice::EpisodeChanged { index, url } => {
            println!(
                "{} episode {} -> {}",
                style("switch").cyan().bold(),
                index + 1,
                url
            );
        }
        PlayerNotice::Fault(fault) => {
            println!(
                "{} {} fault{}: {}",
                style("fault").yellow().bold(),
                fault.kind,
                if fault.fatal { " (fatal)" } else { "" },
                fault.detail
            );
        }
        PlayerNotice::PlaybackError { message } => {
            println!("{} {}", style("error").red().bold(), message);
        }
        PlayerNotice::PositionRestored { position } => {
            println!("{} resumed from {:.0}s", style("resume").green(), position);
        }
        PlayerNotice::StillLoading => {
            println!(
                "{}",
                style("Loading is taking longer than expected; try another source if it stalls")
                    .yellow()
            );
        }
        PlayerNotice::ExitFullscreen => {
            println!("{}", style("playback finished").dim());
        }
        PlayerNotice::Toast { level, message } => {
            let tag = match level {
                NoticeLevel::Success => style("ok").green(),
                NoticeLevel::Warning => style("warning").yellow(),
                NoticeLevel::Error => style("error").red(),
            };
            println!("{} {}", tag.bold(), message);
        }
    }
}

fn run_history(limit: usize, config: Option<PathBuf>) {
    let app = AppConfig::load(config.as_ref());
    let entries = history_store(&app).list();
    if entries.is_empty() {
        println!("{}", style("No watch history").dim());
        return;
    }
    for entry in entries.iter().take(limit) {
        let episode = entry
            .episode_index
            .map(|i| format!("episode {}", i + 1))
            .unwrap_or_else(|| "unknown episode".to_string());
        let progress = if entry.duration > 0.0 {
            format!(
                " [{:.0}s/{:.0}s]",
                entry.playback_position, entry.duration
            )
        } else {
            String::new()
        };
        println!(
            "{} {} ({}, {} of {}){}",
            style(">").cyan(),
            style(&entry.title).bold(),
            if entry.source_name.is_empty() {
                "unknown source"
            } else {
                entry.source_name.as_str()
            },
            episode,
            entry.episodes.len().max(1),
            style(progress).dim()
        );
    }
}

async fn run_sources(title: String, config: Option<PathBuf>) {
    let app = AppConfig::load(config.as_ref());
    let catalog = app.catalog();
    if catalog.is_empty() {
        eprintln!(
            "{} no sources configured; add [[source]] entries to the config file",
            style("error:").red().bold()
        );
        std::process::exit(2);
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static spinner template"),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Searching sources for \"{}\"...", title));

    let switcher = ResourceSwitcher::new(catalog, Arc::new(app.search()));
    let candidates = switcher.list_candidates(&title, None).await;
    spinner.finish_and_clear();

    if candidates.is_empty() {
        println!("{}", style("No source carries this title").yellow());
        return;
    }
    for candidate in candidates {
        println!(
            "{} {} ({}): {} episodes",
            style(">").cyan(),
            style(&candidate.name).bold(),
            candidate.key,
            candidate.episode_count
        );
    }
}
