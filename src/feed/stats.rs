//! Per-channel statistics derived from a normalized episode list.
//!
//! Feeds are assumed newest-first and are not re-sorted: the first element is
//! the latest episode and the last element is the oldest.
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::episode::Episode;
use crate::util::host_of;

/// A statistic that needs at least one input value was asked of an empty set.
///
/// Callers degrade the affected field to `null` instead of failing the source.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no episodes with a usable {0}")]
    Empty(&'static str),
}

/// Aggregates computed for one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeStats {
    pub total: usize,
    pub first_episode_date: Option<DateTime<Utc>>,
    pub last_episode_date: Option<DateTime<Utc>>,
    pub first_episode_link: Option<String>,
    pub last_episode_link: Option<String>,
    pub file_server: Option<String>,
    pub duration_average: Option<u64>,
    pub duration_median: Option<u64>,
}

/// Parses an episode duration into whole seconds.
///
/// Accepts `HH:MM:SS`, `MM:SS` and plain seconds. Anything else, including
/// fractional seconds and negative numbers, is rejected.
///
/// ```
/// use castsnap::feed::parse_duration;
///
/// assert_eq!(parse_duration("01:02:03"), Some(3723));
/// assert_eq!(parse_duration("45:00"), Some(2700));
/// assert_eq!(parse_duration("1800"), Some(1800));
/// assert_eq!(parse_duration("about an hour"), None);
/// ```
pub fn parse_duration(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(3);
    for part in raw.split(':') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        parts.push(part.parse::<u64>().ok()?);
    }

    match parts.as_slice() {
        [s] => Some(*s),
        [m, s] => m.checked_mul(60)?.checked_add(*s),
        [h, m, s] => h.checked_mul(3600)?.checked_add(m.checked_mul(60)?)?.checked_add(*s),
        _ => None,
    }
}

/// Arithmetic mean of the durations, rounded to the nearest second.
pub fn duration_average(durations: &[u64]) -> Result<u64, ExtractionError> {
    if durations.is_empty() {
        return Err(ExtractionError::Empty("duration"));
    }
    let sum: u128 = durations.iter().map(|&d| u128::from(d)).sum();
    let count = durations.len() as u128;
    // Round half up
    let mean = (sum + count / 2) / count;
    Ok(u64::try_from(mean).unwrap_or(u64::MAX))
}

/// Median of the durations. With an even count the lower of the two middle
/// values is returned, so the result is always an observed duration.
pub fn duration_median(durations: &[u64]) -> Result<u64, ExtractionError> {
    if durations.is_empty() {
        return Err(ExtractionError::Empty("duration"));
    }
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();
    Ok(sorted[(sorted.len() - 1) / 2])
}

/// Computes the channel statistics for one source's episodes.
pub fn extract_stats(key: &str, episodes: &[Episode]) -> EpisodeStats {
    let newest = episodes.first();
    let oldest = episodes.last();

    let durations: Vec<u64> = episodes
        .iter()
        .filter_map(|e| e.duration.as_deref().and_then(parse_duration))
        .collect();

    let skipped = episodes.len() - durations.len();
    if skipped > 0 {
        tracing::debug!(key = %key, skipped, "Episodes without a parseable duration");
    }

    let duration_average = duration_average(&durations)
        .map_err(|e| tracing::debug!(key = %key, error = %e, "durationAverage unavailable"))
        .ok();
    let duration_median = duration_median(&durations)
        .map_err(|e| tracing::debug!(key = %key, error = %e, "durationMedian unavailable"))
        .ok();

    EpisodeStats {
        total: episodes.len(),
        first_episode_date: oldest.and_then(|e| e.published),
        last_episode_date: newest.and_then(|e| e.published),
        first_episode_link: oldest.and_then(|e| e.link.clone()),
        last_episode_link: newest.and_then(|e| e.link.clone()),
        file_server: newest
            .and_then(|e| e.enclosure.as_deref())
            .and_then(host_of),
        duration_average,
        duration_median,
    }
}
