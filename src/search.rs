//! Title → episode-list search collaborator.
//!
//! Each source exposes a CMS-style search endpoint returning a JSON `list`
//! whose items carry a `#`-separated play-URL field. Failures degrade to an
//! empty result so one broken catalog never blocks the rest of the flow.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::source::SourceSite;

/// Default query path appended to a source's api endpoint.
pub const DEFAULT_SEARCH_PATH: &str = "?ac=videolist&wd=";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("search response from {url} was not valid JSON: {reason}")]
    Decode { url: String, reason: String },
}

/// One playable episode as returned by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub url: String,
    pub label: String,
}

/// One title matched by a source search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub episodes: Vec<Episode>,
}

#[async_trait]
pub trait EpisodeSearch: Send + Sync {
    async fn search(&self, site: &SourceSite, title: &str) -> Result<Vec<SearchHit>, SearchError>;
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    list: Vec<ApiItem>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiItem {
    #[serde(default, alias = "name")]
    vod_name: String,
    #[serde(default)]
    vod_play_url: String,
}

/// Split a `#`-separated play-URL field into labeled episodes. Each entry is
/// `label$url`; a missing label becomes "Episode N", a missing URL stays
/// empty and is filtered by consumers.
pub fn parse_play_url(raw: &str) -> Vec<Episode> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split('#')
        .enumerate()
        .map(|(i, part)| {
            let (label, url) = match part.split_once('$') {
                Some((label, url)) => (label.to_string(), url.to_string()),
                None => (part.to_string(), String::new()),
            };
            let label = if label.is_empty() {
                format!("Episode {}", i + 1)
            } else {
                label
            };
            Episode { url, label }
        })
        .collect()
}

/// HTTP search client shared across all sources.
#[derive(Debug, Clone)]
pub struct HttpSearch {
    client: Client,
    search_path: String,
}

impl HttpSearch {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            search_path: DEFAULT_SEARCH_PATH.to_string(),
        }
    }

    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.search_path = path.into();
        self
    }
}

impl Default for HttpSearch {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl EpisodeSearch for HttpSearch {
    async fn search(&self, site: &SourceSite, title: &str) -> Result<Vec<SearchHit>, SearchError> {
        let encoded: String =
            url::form_urlencoded::byte_serialize(title.as_bytes()).collect();
        let url = format!("{}{}{}", site.api, self.search_path, encoded);
        debug!(source = %site.key, url, "Searching source");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(SearchError::Request {
                url,
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }

        let body: ApiResponse = response.json().await.map_err(|e| {
            warn!(source = %site.key, error = %e, "Malformed search response");
            SearchError::Decode {
                url,
                reason: e.to_string(),
            }
        })?;

        Ok(body
            .list
            .into_iter()
            .map(|item| SearchHit {
                title: item.vod_name,
                episodes: parse_play_url(&item.vod_play_url),
            })
            .collect())
    }
}
