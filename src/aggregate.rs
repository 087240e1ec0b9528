//! Fan-in of per-source outcomes into the global views of the artifact.
//!
//! Everything here is a pure function of the outcome list and `now`, so two
//! runs over identical feeds produce identical orderings regardless of which
//! fetch finished first.
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::cover::CoverJob;
use crate::feed::{format_local_seconds, Episode, FetchedSource, SourceOutcome};
use crate::sink::OutputSink;
use crate::util::file_extension;

/// Extension assumed when the cover URL has none.
const DEFAULT_COVER_EXT: &str = "jpg";

/// Per-source summary, serialized with the field names the site expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    pub feed: String,
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashtag: Option<String>,
    /// Public path of the original cover; `null` when there is none or the
    /// download failed.
    pub cover: Option<String>,
    pub total: usize,
    pub first_episode_date: Option<String>,
    pub last_episode_date: Option<String>,
    pub first_episode_link: Option<String>,
    pub last_episode_link: Option<String>,
    pub file_server: Option<String>,
    pub duration_average: Option<u64>,
    pub duration_median: Option<u64>,
    pub description: Option<String>,
}

impl Channel {
    fn from_fetched(fetched: &FetchedSource, cover: Option<String>) -> Self {
        let FetchedSource {
            source,
            feed,
            stats,
        } = fetched;

        Self {
            key: source.key.clone(),
            title: feed.channel.title.clone(),
            twitter: source.twitter.clone(),
            feed: source.feed.clone(),
            link: feed.channel.link.clone(),
            hashtag: source.hashtag.clone(),
            cover,
            total: stats.total,
            first_episode_date: stats.first_episode_date.as_ref().map(format_local_seconds),
            last_episode_date: stats.last_episode_date.as_ref().map(format_local_seconds),
            first_episode_link: stats.first_episode_link.clone(),
            last_episode_link: stats.last_episode_link.clone(),
            file_server: stats.file_server.clone(),
            duration_average: stats.duration_average,
            duration_median: stats.duration_median,
            description: feed.channel.description.clone(),
        }
    }
}

/// Result of merging every source outcome.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub load_order: Vec<String>,
    pub recent_episodes: Vec<Episode>,
    pub channels: BTreeMap<String, Channel>,
    pub episode_count: usize,
    /// Covers to download, in key order.
    pub covers: Vec<CoverJob>,
}

/// Merges all outcomes. Must only be called once every source has finished.
pub fn merge(
    outcomes: &[SourceOutcome],
    now: DateTime<Utc>,
    window_days: u32,
    sink: &OutputSink,
) -> Aggregate {
    let mut fetched: Vec<&FetchedSource> = outcomes
        .iter()
        .filter_map(|o| match o {
            SourceOutcome::Fetched(f) => Some(f.as_ref()),
            SourceOutcome::Failed(_) => None,
        })
        .collect();
    fetched.sort_by(|a, b| a.source.key.cmp(&b.source.key));

    let episode_count = outcomes.iter().map(SourceOutcome::item_count).sum();

    let mut channels = BTreeMap::new();
    let mut covers = Vec::new();
    for f in &fetched {
        let key = &f.source.key;
        let cover = f.feed.cover_url.as_ref().map(|url| {
            let ext = file_extension(url).unwrap_or_else(|| DEFAULT_COVER_EXT.to_string());
            let public = sink.cover_public_path(key, &ext);
            covers.push(CoverJob {
                key: key.clone(),
                source_url: url.clone(),
                ext,
            });
            public
        });
        channels.insert(key.clone(), Channel::from_fetched(f, cover));
    }

    let aggregate = Aggregate {
        load_order: load_order(&fetched),
        recent_episodes: recent_episodes(&fetched, recency_cutoff(now, window_days)),
        channels,
        episode_count,
        covers,
    };

    tracing::info!(
        channels = aggregate.channels.len(),
        recent = aggregate.recent_episodes.len(),
        episodes = aggregate.episode_count,
        "Aggregation complete"
    );
    aggregate
}

/// Start of the recency window: `now` truncated to midnight UTC, minus
/// `window_days`.
pub fn recency_cutoff(now: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    midnight - Duration::days(i64::from(window_days))
}

/// Keys of sources with at least one episode, newest first.
///
/// A source's position is decided by its first (newest) item. An unparseable
/// date sorts after every parseable one; equal dates fall back to key order.
pub fn load_order(fetched: &[&FetchedSource]) -> Vec<String> {
    let mut latest: Vec<(&str, Option<DateTime<Utc>>)> = fetched
        .iter()
        .filter_map(|f| {
            f.feed
                .episodes
                .first()
                .map(|newest| (f.source.key.as_str(), newest.published))
        })
        .collect();

    latest.sort_by(|(a_key, a_date), (b_key, b_date)| {
        newest_first(a_date, b_date).then_with(|| a_key.cmp(b_key))
    });
    latest.into_iter().map(|(key, _)| key.to_string()).collect()
}

/// Episodes published strictly after `cutoff`, newest first.
///
/// The sort is stable over key order then feed order, so equal timestamps
/// keep a deterministic position. Episodes with no parseable date are never
/// recent.
pub fn recent_episodes(fetched: &[&FetchedSource], cutoff: DateTime<Utc>) -> Vec<Episode> {
    let mut recent: Vec<Episode> = fetched
        .iter()
        .flat_map(|f| f.feed.episodes.iter())
        .filter(|e| e.published.is_some_and(|p| p > cutoff))
        .cloned()
        .collect();

    recent.sort_by(|a, b| newest_first(&a.published, &b.published));
    recent
}

// Option's ordering puts None first, so reversing it gives "newest first,
// undated last".
fn newest_first(a: &Option<DateTime<Utc>>, b: &Option<DateTime<Utc>>) -> Ordering {
    b.cmp(a)
}
