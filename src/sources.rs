//! The static list of feeds to ingest.
//!
//! Accepted shapes, chosen by file extension:
//!
//! ```toml
//! # sources.toml
//! [sources.rebuild]
//! feed = "https://feeds.rebuild.fm/rebuildfm"
//! twitter = "rebuildfm"
//! hashtag = "rebuildfm"
//! ```
//!
//! ```json
//! { "rebuild": { "feed": "https://feeds.rebuild.fm/rebuildfm", "twitter": "rebuildfm" } }
//! ```
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{read_bounded, ConfigError};
use crate::util::validate_url;

/// One configured feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Unique id; also the file stem for the raw feed and cover.
    pub key: String,
    pub feed: String,
    pub twitter: Option<String>,
    pub hashtag: Option<String>,
}

impl Source {
    pub fn new(key: &str, feed: &str) -> Self {
        Self {
            key: key.to_string(),
            feed: feed.to_string(),
            twitter: None,
            hashtag: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    feed: String,
    #[serde(default)]
    twitter: Option<String>,
    #[serde(default)]
    hashtag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourcesToml {
    #[serde(default)]
    sources: BTreeMap<String, SourceEntry>,
}

/// Loads and validates the sources file. The result is ordered by key.
///
/// # Errors
///
/// Fails on a missing or unreadable file, malformed TOML/JSON, keys that are
/// unusable as file names, and feed URLs rejected by [`validate_url`].
pub fn load_sources(path: &Path, allow_private: bool) -> Result<Vec<Source>, ConfigError> {
    let content = read_bounded(path)?.ok_or_else(|| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("sources file not found: {}", path.display()),
        ))
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let entries: BTreeMap<String, SourceEntry> = if is_json {
        serde_json::from_str(&content)?
    } else {
        toml::from_str::<SourcesToml>(&content)?.sources
    };

    let sources = entries
        .into_iter()
        .map(|(key, entry)| into_source(key, entry, allow_private))
        .collect::<Result<Vec<_>, _>>()?;

    if sources.is_empty() {
        tracing::warn!(path = %path.display(), "Sources file lists no feeds");
    } else {
        tracing::info!(path = %path.display(), count = sources.len(), "Loaded sources");
    }
    Ok(sources)
}

fn into_source(key: String, entry: SourceEntry, allow_private: bool) -> Result<Source, ConfigError> {
    if !is_valid_key(&key) {
        return Err(ConfigError::InvalidSource {
            key,
            reason: "keys may only contain letters, digits, '-', '_' and '.'".to_string(),
        });
    }

    let feed = entry.feed.trim().to_string();
    if let Err(e) = validate_url(&feed, allow_private) {
        return Err(ConfigError::InvalidSource {
            key,
            reason: e.to_string(),
        });
    }

    let non_empty = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    Ok(Source {
        key,
        feed,
        twitter: non_empty(entry.twitter),
        hashtag: non_empty(entry.hashtag),
    })
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
