use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::search::{EpisodeSearch, SearchError};
use crate::source::SourceCatalog;

/// One switchable source as offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCandidate {
    pub key: String,
    pub name: String,
    pub episode_count: usize,
    pub active: bool,
}

/// A fully resolved switch target: title, source and episode list change
/// atomically together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSwitch {
    pub title: String,
    pub source_code: String,
    pub index: usize,
    pub url: String,
    pub episodes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),
    #[error("no matching resource for '{title}' on source '{source_name}'")]
    NoMatch { source_name: String, title: String },
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Moves between alternate source catalogs hosting the same title.
pub struct ResourceSwitcher {
    catalog: SourceCatalog,
    search: Arc<dyn EpisodeSearch>,
    max_concurrent_queries: usize,
}

impl ResourceSwitcher {
    pub fn new(catalog: SourceCatalog, search: Arc<dyn EpisodeSearch>) -> Self {
        Self {
            catalog,
            search,
            max_concurrent_queries: 4,
        }
    }

    pub fn with_max_concurrent_queries(mut self, max: usize) -> Self {
        self.max_concurrent_queries = max.max(1);
        self
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    /// List switch candidates in catalog order, each with a live episode
    /// count. Restricted catalogs are excluded. The active source is always
    /// kept even when its count resolves to zero (a transient search failure
    /// must not hide the source the user is watching); every other
    /// zero-count candidate is dropped.
    pub async fn list_candidates(
        &self,
        title: &str,
        active_key: Option<&str>,
    ) -> Vec<ResourceCandidate> {
        let sites: Vec<_> = self.catalog.visible().cloned().collect();
        let queries = sites.iter().enumerate().map(|(i, site)| {
            let search = Arc::clone(&self.search);
            let site = site.clone();
            let title = title.to_string();
            async move {
                let count = match search.search(&site, &title).await {
                    Ok(hits) => hits.first().map(|h| h.episodes.len()).unwrap_or(0),
                    Err(e) => {
                        warn!(source = %site.key, error = %e, "Candidate search failed");
                        0
                    }
                };
                (i, count)
            }
        });

        let mut counts: Vec<(usize, usize)> = stream::iter(queries)
            .buffer_unordered(self.max_concurrent_queries)
            .collect()
            .await;
        counts.sort_by_key(|(i, _)| *i);

        counts
            .into_iter()
            .map(|(i, count)| {
                let site = &sites[i];
                ResourceCandidate {
                    key: site.key.clone(),
                    name: site.name.clone(),
                    episode_count: count,
                    active: active_key == Some(site.key.as_str()),
                }
            })
            .filter(|c| c.active || c.episode_count > 0)
            .collect()
    }

    /// Resolve a switch to another source: fetch its episode list for the
    /// title, fall back to episode 0 when the preferred index is out of
    /// range, and fail without touching any state when no playable URL
    /// exists at the resolved position.
    pub async fn resolve_switch(
        &self,
        key: &str,
        title: &str,
        preferred_index: usize,
    ) -> Result<ResourceSwitch, SwitchError> {
        let site = self
            .catalog
            .get(key)
            .ok_or_else(|| SwitchError::UnknownSource(key.to_string()))?;

        let hits = self.search.search(site, title).await?;
        let Some(hit) = hits.first() else {
            return Err(SwitchError::NoMatch {
                source_name: key.to_string(),
                title: title.to_string(),
            });
        };

        let episodes: Vec<String> = hit.episodes.iter().map(|e| e.url.clone()).collect();
        let index = if preferred_index >= episodes.len() {
            0
        } else {
            preferred_index
        };
        let url = episodes
            .get(index)
            .filter(|u| !u.is_empty())
            .cloned()
            .ok_or_else(|| SwitchError::NoMatch {
                source_name: key.to_string(),
                title: title.to_string(),
            })?;

        debug!(source = %key, index, episodes = episodes.len(), "Resolved resource switch");
        Ok(ResourceSwitch {
            title: hit.title.clone(),
            source_code: key.to_string(),
            index,
            url,
            episodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Episode, SearchHit};
    use crate::source::SourceSite;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubSearch {
        hits: HashMap<String, Vec<SearchHit>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl EpisodeSearch for StubSearch {
        async fn search(
            &self,
            site: &SourceSite,
            _title: &str,
        ) -> Result<Vec<SearchHit>, SearchError> {
            if self.failing.contains(&site.key) {
                return Err(SearchError::Request {
                    url: site.api.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(self.hits.get(&site.key).cloned().unwrap_or_default())
        }
    }

    fn site(key: &str, restricted: bool) -> SourceSite {
        SourceSite {
            key: key.to_string(),
            name: format!("{} VOD", key),
            api: format!("https://api.{}.example", key),
            detail: None,
            restricted,
        }
    }

    fn hit(n: usize) -> Vec<SearchHit> {
        vec![SearchHit {
            title: "Show".to_string(),
            episodes: (0..n)
                .map(|i| Episode {
                    url: format!("https://cdn/e{}.m3u8", i),
                    label: format!("EP{}", i + 1),
                })
                .collect(),
        }]
    }

    fn switcher(hits: HashMap<String, Vec<SearchHit>>, failing: Vec<String>) -> ResourceSwitcher {
        let catalog = SourceCatalog::new(vec![
            site("alpha", false),
            site("beta", false),
            site("gamma", false),
            site("adultsonly", true),
        ]);
        ResourceSwitcher::new(catalog, Arc::new(StubSearch { hits, failing }))
    }

    #[tokio::test]
    async fn candidates_keep_catalog_order_and_drop_empty() {
        let mut hits = HashMap::new();
        hits.insert("alpha".to_string(), hit(12));
        hits.insert("gamma".to_string(), hit(3));
        let switcher = switcher(hits, vec![]);

        let candidates = switcher.list_candidates("Show", None).await;
        let keys: Vec<&str> = candidates.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "gamma"]);
        assert_eq!(candidates[0].episode_count, 12);
    }

    #[tokio::test]
    async fn active_source_survives_zero_count() {
        let mut hits = HashMap::new();
        hits.insert("alpha".to_string(), hit(12));
        let switcher = switcher(hits, vec!["beta".to_string()]);

        let candidates = switcher.list_candidates("Show", Some("beta")).await;
        let keys: Vec<&str> = candidates.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "beta"]);
        assert!(candidates[1].active);
        assert_eq!(candidates[1].episode_count, 0);
    }

    #[tokio::test]
    async fn restricted_sources_are_never_offered() {
        let mut hits = HashMap::new();
        hits.insert("adultsonly".to_string(), hit(5));
        hits.insert("alpha".to_string(), hit(2));
        let switcher = switcher(hits, vec![]);

        let candidates = switcher.list_candidates("Show", Some("adultsonly")).await;
        assert!(candidates.iter().all(|c| c.key != "adultsonly"));
    }

    #[tokio::test]
    async fn switch_falls_back_to_first_episode_when_preferred_out_of_range() {
        let mut hits = HashMap::new();
        hits.insert("beta".to_string(), hit(2));
        let switcher = switcher(hits, vec![]);

        let switch = switcher.resolve_switch("beta", "Show", 7).await.unwrap();
        assert_eq!(switch.index, 0);
        assert_eq!(switch.url, "https://cdn/e0.m3u8");
        assert_eq!(switch.episodes.len(), 2);
    }

    #[tokio::test]
    async fn switch_with_no_hits_reports_no_match() {
        let switcher = switcher(HashMap::new(), vec![]);
        let result = switcher.resolve_switch("beta", "Show", 0).await;
        assert!(matches!(result, Err(SwitchError::NoMatch { .. })));
    }

    #[tokio::test]
    async fn switch_to_unknown_source_is_rejected() {
        let switcher = switcher(HashMap::new(), vec![]);
        let result = switcher.resolve_switch("nope", "Show", 0).await;
        assert!(matches!(result, Err(SwitchError::UnknownSource(_))));
    }

    #[tokio::test]
    async fn search_failure_propagates_for_switch() {
        let switcher = switcher(HashMap::new(), vec!["beta".to_string()]);
        let result = switcher.resolve_switch("beta", "Show", 0).await;
        assert!(matches!(result, Err(SwitchError::Search(_))));
    }
}
