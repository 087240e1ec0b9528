//! Feed ingestion: download, parse and summarize podcast feeds.
//!
//! - [`fetcher`] - concurrent HTTP retrieval with retry and size limits
//! - [`parser`] - RSS 2.0 channel/item extraction, with a `feed-rs` fallback
//!   for other formats
//! - [`stats`] - per-channel aggregates over the normalized episodes
//!
//! # Example
//!
//! ```ignore
//! use castsnap::feed::{fetch_all, FetchPolicy};
//!
//! let outcomes = fetch_all(&client, &sources, &FetchPolicy::from_config(&config), &sink).await;
//! ```

mod date;
mod episode;
mod fetcher;
mod parser;
mod stats;

pub use date::{format_local_seconds, parse_pub_date};
pub use episode::{Episode, RawItem};
pub use fetcher::{
    fetch_all, fetch_source, FetchError, FetchPolicy, FetchedSource, SourceError, SourceFailure,
    SourceOutcome,
};
pub(crate) use fetcher::read_limited_bytes;
pub use parser::{parse_feed, ChannelMeta, ParseError, ParsedFeed};
pub use stats::{
    duration_average, duration_median, extract_stats, parse_duration, EpisodeStats,
    ExtractionError,
};
