use crate::config::Config;
use crate::feed::parser::{parse_feed, ParseError, ParsedFeed};
use crate::feed::stats::{extract_stats, EpisodeStats};
use crate::sink::OutputSink;
use crate::sources::Source;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while downloading one feed body.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Why a source dropped out of the build, by phase.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error("Failed to store raw feed: {0}")]
    Store(#[from] std::io::Error),
    #[error("{0}")]
    Parse(#[from] ParseError),
}

impl SourceError {
    pub fn phase(&self) -> &'static str {
        match self {
            SourceError::Fetch(_) => "fetch",
            SourceError::Store(_) => "store",
            SourceError::Parse(_) => "parse",
        }
    }
}

/// Knobs for a fetch run, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_body_bytes: usize,
    /// 0 = one in-flight fetch per source.
    pub max_concurrent: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl FetchPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.fetch_timeout(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            max_body_bytes: config.max_feed_bytes,
            max_concurrent: config.max_concurrent_fetches,
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
    }
}

/// A source that was fetched and parsed.
#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub source: Source,
    pub feed: ParsedFeed,
    pub stats: EpisodeStats,
}

/// A source that dropped out, with the error that caused it.
#[derive(Debug)]
pub struct SourceFailure {
    pub key: String,
    pub error: SourceError,
}

/// Exactly one of these is produced per configured source.
#[derive(Debug)]
pub enum SourceOutcome {
    Fetched(Box<FetchedSource>),
    Failed(SourceFailure),
}

impl SourceOutcome {
    pub fn key(&self) -> &str {
        match self {
            SourceOutcome::Fetched(f) => &f.source.key,
            SourceOutcome::Failed(f) => &f.key,
        }
    }

    /// Raw `<item>` count, or 0 if the source never got as far as parsing.
    pub fn item_count(&self) -> usize {
        match self {
            SourceOutcome::Fetched(f) => f.feed.item_count,
            SourceOutcome::Failed(_) => 0,
        }
    }
}

/// Fetches, stores, parses and summarizes every source concurrently.
///
/// Each source runs as its own future; a failure in one never affects the
/// others. The returned future completes only once every source has produced
/// its outcome, which makes it the barrier the merge step waits on.
///
/// # Returns
///
/// One [`SourceOutcome`] per source, sorted by key. Completion order is not
/// observable by callers.
pub async fn fetch_all(
    client: &reqwest::Client,
    sources: &[Source],
    policy: &FetchPolicy,
    sink: &OutputSink,
) -> Vec<SourceOutcome> {
    if sources.is_empty() {
        return Vec::new();
    }

    let limit = match policy.max_concurrent {
        0 => sources.len(),
        n => n,
    };
    let total = sources.len();

    let mut outcomes: Vec<SourceOutcome> = stream::iter(sources)
        .map(|source| fetch_source(client, source, policy, sink))
        .buffer_unordered(limit)
        .collect()
        .await;

    outcomes.sort_by(|a, b| a.key().cmp(b.key()));

    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, SourceOutcome::Failed(_)))
        .count();
    tracing::info!(total, failed, "All feeds processed");

    outcomes
}

/// Runs fetch, store, parse and stat extraction for a single source.
pub async fn fetch_source(
    client: &reqwest::Client,
    source: &Source,
    policy: &FetchPolicy,
    sink: &OutputSink,
) -> SourceOutcome {
    match process(client, source, policy, sink).await {
        Ok(fetched) => {
            tracing::info!(
                key = %source.key,
                items = fetched.feed.item_count,
                "Feed OK"
            );
            SourceOutcome::Fetched(Box::new(fetched))
        }
        Err(error) => {
            tracing::warn!(
                key = %source.key,
                feed = %source.feed,
                phase = error.phase(),
                error = %error,
                "Feed failed, excluding from build"
            );
            SourceOutcome::Failed(SourceFailure {
                key: source.key.clone(),
                error,
            })
        }
    }
}

async fn process(
    client: &reqwest::Client,
    source: &Source,
    policy: &FetchPolicy,
    sink: &OutputSink,
) -> Result<FetchedSource, SourceError> {
    let bytes = fetch_bytes(client, &source.feed, policy).await?;
    sink.write_feed(&source.key, &bytes).await?;

    let feed = parse_feed(&source.key, &bytes)?;
    let stats = extract_stats(&source.key, &feed.episodes);

    Ok(FetchedSource {
        source: source.clone(),
        feed,
        stats,
    })
}

async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
    policy: &FetchPolicy,
) -> Result<Vec<u8>, FetchError> {
    let mut retry_count = 0;

    loop {
        let response = tokio::time::timeout(policy.timeout, client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        let status = response.status();
        let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

        if retryable {
            if retry_count >= policy.max_retries {
                return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    FetchError::RateLimited(policy.max_retries)
                } else {
                    FetchError::HttpStatus(status.as_u16())
                });
            }

            let delay = policy.backoff(retry_count);
            tracing::warn!(
                feed = %url,
                status = %status,
                retry = retry_count,
                delay_ms = delay.as_millis() as u64,
                "Retryable response, backing off"
            );
            tokio::time::sleep(delay).await;
            retry_count += 1;
            continue;
        }

        // 4xx errors fail immediately
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        match read_limited_bytes(response, policy.max_body_bytes).await {
            Ok(bytes) => return Ok(bytes),
            Err(FetchError::IncompleteResponse { expected, received })
                if retry_count < policy.max_retries =>
            {
                let delay = policy.backoff(retry_count);
                tracing::debug!(
                    feed = %url,
                    expected,
                    received,
                    attempt = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying incomplete download"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
