//! Publication date parsing.
//!
//! RSS dates are supposed to be RFC-822 but podcast hosts produce a long tail
//! of variants: ISO-8601 stamps, unknown zone abbreviations, missing seconds.
//! Anything that still fails to parse is reported as `None`; the episode is
//! kept and simply drops out of date comparisons.
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Formats tried on the date with its trailing zone token removed, as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parses a feed publication date into a UTC instant.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = parse_with_numeric_zone(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Unknown zone abbreviation ("JST", "CEST"): drop it and assume UTC
    let without_zone = match raw.rsplit_once(' ') {
        Some((head, tail)) if tail.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => raw,
    };
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(without_zone, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(without_zone, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// RFC-822 without seconds, or with a single-digit day plus numeric zone.
fn parse_with_numeric_zone(raw: &str) -> Option<DateTime<FixedOffset>> {
    ["%a, %d %b %Y %H:%M %z", "%d %b %Y %H:%M:%S %z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
}

/// Formats an instant the way channel first/last dates are emitted.
pub fn format_local_seconds(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}
