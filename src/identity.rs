use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Characters escaped when deriving an identity from a URL or title.
/// Matches component-style encoding: alphanumerics and `-_.!~*'()` pass.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Stable key naming one playable unit (episode) for persistence purposes.
///
/// Derived from the direct media URL when one is known (stable across
/// reloads, distinct across episodes), otherwise from title plus episode
/// index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoIdentity(String);

impl VideoIdentity {
    pub fn derive(url: Option<&str>, title: &str, episode_index: usize) -> Self {
        match url {
            Some(u) if !u.is_empty() => {
                Self(utf8_percent_encode(u, COMPONENT).to_string())
            }
            _ => Self(format!(
                "{}_{}",
                utf8_percent_encode(title, COMPONENT),
                episode_index
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
