//! The `build_info.json` document read by the site generator.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::aggregate::{Aggregate, Channel};
use crate::feed::Episode;
use crate::sink::{write_atomic, OutputSink};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Failed to serialize build artifact: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildArtifact {
    pub load_order: Vec<String>,
    #[serde(rename = "episodes_in_2weeks")]
    pub recent_episodes: Vec<Episode>,
    pub channels: BTreeMap<String, Channel>,
    #[serde(serialize_with = "rfc3339_millis")]
    pub updated: DateTime<Utc>,
    #[serde(rename = "episodeCount")]
    pub episode_count: usize,
}

impl BuildArtifact {
    /// `updated` should be the moment aggregation finished.
    pub fn new(aggregate: Aggregate, updated: DateTime<Utc>) -> Self {
        Self {
            load_order: aggregate.load_order,
            recent_episodes: aggregate.recent_episodes,
            channels: aggregate.channels,
            updated,
            episode_count: aggregate.episode_count,
        }
    }

    /// Clears the cover of a channel whose cover download failed.
    pub fn drop_cover(&mut self, key: &str) {
        if let Some(channel) = self.channels.get_mut(key) {
            channel.cover = None;
        }
    }
}

fn rfc3339_millis<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Serializes the artifact and atomically replaces `build_info.json`.
pub fn write_artifact(sink: &OutputSink, artifact: &BuildArtifact) -> Result<PathBuf, WriteError> {
    let json = serde_json::to_vec(artifact)?;
    let path = sink.artifact_path();
    write_atomic(&path, &json).map_err(|source| WriteError::Io {
        path: path.clone(),
        source,
    })?;

    tracing::info!(
        path = %path.display(),
        bytes = json.len(),
        channels = artifact.channels.len(),
        "Build artifact written"
    );
    Ok(path)
}
