//! Canonical address state.
//!
//! The player URL's query string is the single source of truth for what is
//! playing. Only the navigation layer writes it; everything else reads the
//! parsed [`PlayerParams`] snapshot.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;
use url::Url;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid player address: {0}")]
    Parse(#[from] url::ParseError),
    #[error("nested player reference carries no media URL")]
    NestedReference,
}

/// Query parameter names shared with the embedding site.
pub mod params {
    pub const URL: &str = "url";
    pub const TITLE: &str = "title";
    pub const SOURCE: &str = "source";
    pub const SOURCE_CODE: &str = "source_code";
    pub const VOD_ID: &str = "id";
    pub const INDEX: &str = "index";
    pub const EPISODES: &str = "episodes";
    pub const POSITION: &str = "position";
    pub const RETURN_URL: &str = "returnUrl";
}

/// Marker identifying a nested player reference left behind by an old
/// history redirect.
const PLAYER_PAGE: &str = "player.html";

/// Decoded snapshot of the address parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerParams {
    pub url: Option<String>,
    pub title: Option<String>,
    pub source_name: Option<String>,
    pub source_code: Option<String>,
    pub vod_id: Option<String>,
    pub index: usize,
    pub episodes: Option<Vec<String>>,
    pub position: Option<f64>,
    pub return_url: Option<String>,
}

/// The canonical address plus its parsed parameters.
#[derive(Debug, Clone)]
pub struct AddressState {
    url: Url,
}

impl AddressState {
    pub fn parse(href: &str) -> Result<Self, AddressError> {
        Ok(Self {
            url: Url::parse(href)?,
        })
    }

    pub fn href(&self) -> String {
        self.url.to_string()
    }

    pub fn params(&self) -> PlayerParams {
        let mut out = PlayerParams::default();
        for (key, value) in self.url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                params::URL if !value.is_empty() => out.url = Some(value),
                params::TITLE if !value.is_empty() => out.title = Some(value),
                params::SOURCE if !value.is_empty() => out.source_name = Some(value),
                params::SOURCE_CODE if !value.is_empty() => out.source_code = Some(value),
                params::VOD_ID if !value.is_empty() => out.vod_id = Some(value),
                params::INDEX => out.index = value.parse().unwrap_or(0),
                params::EPISODES => out.episodes = serde_json::from_str(&value).ok(),
                params::POSITION => out.position = value.parse().ok(),
                params::RETURN_URL if !value.is_empty() => out.return_url = Some(value),
                _ => {}
            }
        }
        out
    }

    /// Rewrite the canonical index after a bounds repair.
    pub fn set_index(&mut self, index: usize) {
        self.set_param(params::INDEX, Some(&index.to_string()));
    }

    /// Rewrite the address for an episode switch: new index and media URL,
    /// any stale initial-position request dropped.
    pub fn set_episode(&mut self, index: usize, media_url: &str) {
        self.set_param(params::INDEX, Some(&index.to_string()));
        self.set_param(params::URL, Some(media_url));
        self.set_param(params::POSITION, None);
    }

    /// Rewrite the address for a resource switch: title, source and episode
    /// all change together.
    pub fn set_resource(&mut self, title: &str, source_code: &str, index: usize, media_url: &str) {
        self.set_param(params::TITLE, Some(title));
        self.set_param(params::SOURCE_CODE, Some(source_code));
        self.set_episode(index, media_url);
    }

    pub fn set_source_code(&mut self, source_code: &str) {
        self.set_param(params::SOURCE_CODE, Some(source_code));
    }

    /// Unwrap one level of nested player reference (a historical redirect
    /// artifact): recover the real media URL and merge position/index/title
    /// into any outer parameter that is missing, rewriting in place.
    ///
    /// Returns whether the address changed.
    pub fn unwrap_nested(&mut self) -> Result<bool, AddressError> {
        let outer = self.params();
        let Some(ref wrapped) = outer.url else {
            return Ok(false);
        };
        if !wrapped.contains(PLAYER_PAGE) {
            return Ok(false);
        }

        let nested: HashMap<String, String> = wrapped
            .split_once('?')
            .map(|(_, query)| {
                form_urlencoded::parse(query.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let Some(media_url) = nested.get(params::URL).filter(|u| !u.is_empty()) else {
            return Err(AddressError::NestedReference);
        };

        self.set_param(params::URL, Some(media_url));
        if outer.position.is_none() {
            if let Some(position) = nested.get(params::POSITION) {
                self.set_param(params::POSITION, Some(position));
            }
        }
        if !self.has_param(params::INDEX) {
            if let Some(index) = nested.get(params::INDEX) {
                self.set_param(params::INDEX, Some(index));
            }
        }
        if outer.title.is_none() {
            if let Some(title) = nested.get(params::TITLE) {
                self.set_param(params::TITLE, Some(title));
            }
        }
        debug!(href = %self.href(), "Unwrapped nested player reference");
        Ok(true)
    }

    fn has_param(&self, key: &str) -> bool {
        self.url.query_pairs().any(|(k, _)| k == key)
    }

    fn set_param(&mut self, key: &str, value: Option<&str>) {
        let retained: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| k != key)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = self.url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &retained {
                pairs.append_pair(k, v);
            }
            if let Some(v) = value {
                pairs.append_pair(key, v);
            }
        }
        if self.url.query() == Some("") {
            self.url.set_query(None);
        }
    }
}

/// Build a player link that restores an exact episode and position, used
/// for history entries.
pub fn player_link(
    media_url: &str,
    title: &str,
    source_name: &str,
    source_code: &str,
    vod_id: &str,
    index: usize,
    position: f64,
) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair(params::URL, media_url)
        .append_pair(params::TITLE, title)
        .append_pair(params::SOURCE, source_name)
        .append_pair(params::SOURCE_CODE, source_code)
        .append_pair(params::VOD_ID, vod_id)
        .append_pair(params::INDEX, &index.to_string())
        .append_pair(params::POSITION, &(position.max(0.0).floor() as u64).to_string())
        .finish();
    format!("{}?{}", PLAYER_PAGE, query)
}
