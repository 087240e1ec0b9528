//! One complete build: prepare output, fetch, merge, covers, write.
use chrono::{DateTime, Utc};
use reqwest::redirect::Policy;
use std::path::PathBuf;
use thiserror::Error;

use crate::aggregate::merge;
use crate::artifact::{write_artifact, BuildArtifact, WriteError};
use crate::config::Config;
use crate::cover::{CoverError, CoverOutcome, CoverPipeline};
use crate::feed::{fetch_all, FetchPolicy, SourceFailure, SourceOutcome};
use crate::sink::OutputSink;
use crate::sources::Source;

/// Failures that end the run. Everything per source or per cover is
/// recorded in [`RunReport`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to prepare output directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// What a finished run produced and what went wrong along the way.
#[derive(Debug)]
pub struct RunReport {
    pub artifact: BuildArtifact,
    pub artifact_path: PathBuf,
    pub source_count: usize,
    pub failures: Vec<SourceFailure>,
    pub cover_failures: Vec<(String, CoverError)>,
}

impl RunReport {
    /// Fraction of sources that failed, 0.0 when there were none.
    pub fn failure_ratio(&self) -> f64 {
        if self.source_count == 0 {
            return 0.0;
        }
        self.failures.len() as f64 / self.source_count as f64
    }

    pub fn exceeds(&self, max_failure_ratio: f64) -> bool {
        self.failure_ratio() > max_failure_ratio
    }
}

/// Builds the HTTP client shared by feed and cover downloads.
pub fn build_client(config: &Config) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .redirect(redirect_policy())
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .build()
}

/// Follows up to 5 redirects and refuses loops.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Runs the whole build against `sources`.
///
/// `now` anchors the recency window. The artifact's `updated` stamp is taken
/// when aggregation completes.
///
/// # Errors
///
/// Only a failure to prepare the output directory or to write the artifact
/// is returned. Source and cover failures end up in the report.
pub async fn run(
    config: &Config,
    sources: &[Source],
    client: &reqwest::Client,
    now: DateTime<Utc>,
) -> Result<RunReport, PipelineError> {
    let sink = OutputSink::new(&config.output_dir, &config.public_path_prefix);
    sink.prepare().map_err(|source| PipelineError::Prepare {
        path: config.output_dir.clone(),
        source,
    })?;

    tracing::info!(sources = sources.len(), "Fetching feeds");
    let policy = FetchPolicy::from_config(config);
    let outcomes = fetch_all(client, sources, &policy, &sink).await;

    let aggregate = merge(&outcomes, now, config.recent_window_days, &sink);
    let updated = Utc::now();
    let covers = aggregate.covers.clone();
    let mut artifact = BuildArtifact::new(aggregate, updated);

    let mut cover_failures = Vec::new();
    if config.skip_covers {
        tracing::info!(covers = covers.len(), "Skipping cover downloads");
    } else {
        let pipeline = CoverPipeline::new(client.clone(), sink.clone(), config);
        for outcome in pipeline.run(&covers).await {
            if let CoverOutcome::Failed { key, error } = outcome {
                artifact.drop_cover(&key);
                cover_failures.push((key, error));
            }
        }
    }

    let artifact_path = write_artifact(&sink, &artifact)?;

    let failures: Vec<SourceFailure> = outcomes
        .into_iter()
        .filter_map(|o| match o {
            SourceOutcome::Failed(f) => Some(f),
            SourceOutcome::Fetched(_) => None,
        })
        .collect();

    Ok(RunReport {
        artifact,
        artifact_path,
        source_count: sources.len(),
        failures,
        cover_failures,
    })
}
