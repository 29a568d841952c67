//! Source catalog and the resource-name lookup heuristic.
//!
//! A source is an alternate content catalog that may host the same title
//! under a different URL scheme. Identifying which source a bare media URL
//! or title belongs to is inherently approximate; the lookup lives here as
//! an isolated, replaceable policy rather than inside the navigation state
//! machine.

use serde::{Deserialize, Serialize};
use url::Url;

/// One known content catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSite {
    pub key: String,
    pub name: String,
    /// Search/listing API endpoint.
    pub api: String,
    /// Optional detail-page endpoint on a separate host.
    #[serde(default)]
    pub detail: Option<String>,
    /// Restricted catalogs are never offered as switch candidates.
    #[serde(default)]
    pub restricted: bool,
}

/// Ordered catalog of known sources. Iteration order is presentation order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCatalog {
    sites: Vec<SourceSite>,
}

impl SourceCatalog {
    pub fn new(sites: Vec<SourceSite>) -> Self {
        Self { sites }
    }

    pub fn get(&self, key: &str) -> Option<&SourceSite> {
        self.sites.iter().find(|s| s.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceSite> {
        self.sites.iter()
    }

    /// Catalog entries offered as switch candidates.
    pub fn visible(&self) -> impl Iterator<Item = &SourceSite> {
        self.sites.iter().filter(|s| !s.restricted)
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Infer a source key from a bare media URL by host match against the
    /// api/detail endpoints. Used when the address carries a media URL but
    /// no source code.
    pub fn infer_key(&self, media_url: &str) -> Option<&str> {
        let host = Url::parse(media_url).ok()?.host_str()?.to_string();
        for site in &self.sites {
            if let Ok(api) = Url::parse(&site.api) {
                if api.host_str() == Some(host.as_str()) {
                    return Some(&site.key);
                }
            }
            if media_url.contains(&site.api) {
                return Some(&site.key);
            }
            if let Some(ref detail) = site.detail {
                if media_url.contains(detail.as_str()) {
                    return Some(&site.key);
                }
            }
        }
        None
    }
}

/// Prefix marking user-defined sources outside the built-in catalog.
const CUSTOM_PREFIX: &str = "custom_";

/// Configurable inputs for the display-name lookup. The keyword hints map
/// title substrings to catalog keys; the precedence order below preserves
/// observed behavior but is policy, not contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvePolicy {
    #[serde(default)]
    pub keyword_hints: Vec<(String, String)>,
}

/// Resolve a human-readable source name, trying in order:
/// 1. direct catalog key match;
/// 2. `custom_N` user sources;
/// 3. media-URL domain match against api/detail endpoints;
/// 4. partial key match;
/// 5. title keyword hints;
/// 6. the first catalog entry.
pub fn resolve_source_name(
    catalog: &SourceCatalog,
    policy: &ResolvePolicy,
    source_code: Option<&str>,
    media_url: Option<&str>,
    title: Option<&str>,
    custom_names: &[String],
) -> Option<String> {
    if let Some(code) = source_code {
        if let Some(site) = catalog.get(code) {
            return Some(site.name.clone());
        }
        if let Some(index) = code.strip_prefix(CUSTOM_PREFIX) {
            if let Ok(index) = index.parse::<usize>() {
                if let Some(name) = custom_names.get(index) {
                    return Some(name.clone());
                }
            }
        }
    }

    if let Some(url) = media_url {
        if let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
            for site in catalog.iter() {
                if let Some(api_host) =
                    Url::parse(&site.api).ok().and_then(|u| u.host_str().map(String::from))
                {
                    if host == api_host || host.contains(&api_host) || api_host.contains(&host) {
                        return Some(site.name.clone());
                    }
                }
                if let Some(detail_host) = site
                    .detail
                    .as_deref()
                    .and_then(|d| Url::parse(d).ok())
                    .and_then(|u| u.host_str().map(String::from))
                {
                    if host == detail_host
                        || host.contains(&detail_host)
                        || detail_host.contains(&host)
                    {
                        return Some(site.name.clone());
                    }
                }
                if url.contains(&site.api)
                    || site.detail.as_deref().is_some_and(|d| url.contains(d))
                {
                    return Some(site.name.clone());
                }
            }
        }
    }

    if let Some(code) = source_code {
        let lowered = code.to_lowercase();
        for site in catalog.iter() {
            let key = site.key.to_lowercase();
            if key.contains(&lowered) || lowered.contains(&key) {
                return Some(site.name.clone());
            }
        }
    }

    if let Some(title) = title {
        for (keyword, key) in &policy.keyword_hints {
            if title.contains(keyword.as_str()) {
                if let Some(site) = catalog.get(key) {
                    return Some(site.name.clone());
                }
            }
        }
    }

    catalog.iter().next().map(|site| site.name.clone())
}

/// Last-resort display name when the catalog resolves nothing: the media
/// host with any leading `www.` removed.
pub fn host_fallback(media_url: &str) -> Option<String> {
    let url = Url::parse(media_url).ok()?;
    let host = url.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}
