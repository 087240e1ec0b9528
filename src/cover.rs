//! Sequential cover download and resize.
//!
//! Image hosts that serve many podcasts start answering 404/429 when hit by a
//! burst of downloads, so covers are fetched strictly one after another, with
//! an optional pause in between.
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::feed::{read_limited_bytes, FetchError};
use crate::sink::OutputSink;

/// Largest accepted cover download.
const MAX_COVER_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("Download failed: {0}")]
    Download(#[from] FetchError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Resize task failed: {0}")]
    Task(String),
}

/// A cover discovered while parsing a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverJob {
    pub key: String,
    pub source_url: String,
    /// File extension of the stored original, e.g. `jpg`.
    pub ext: String,
}

/// A downloaded cover and whichever resized variants could be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverAsset {
    pub key: String,
    pub source_url: String,
    pub local_path: PathBuf,
    pub derived: BTreeMap<u32, PathBuf>,
}

#[derive(Debug)]
pub enum CoverOutcome {
    Ready(CoverAsset),
    Failed { key: String, error: CoverError },
}

impl CoverOutcome {
    pub fn key(&self) -> &str {
        match self {
            CoverOutcome::Ready(asset) => &asset.key,
            CoverOutcome::Failed { key, .. } => key,
        }
    }
}

pub struct CoverPipeline {
    client: reqwest::Client,
    sink: OutputSink,
    widths: Vec<u32>,
    quality: u8,
    timeout: Duration,
    delay: Duration,
}

impl CoverPipeline {
    pub fn new(client: reqwest::Client, sink: OutputSink, config: &Config) -> Self {
        Self {
            client,
            sink,
            widths: config.cover_widths.clone(),
            quality: config.cover_quality,
            timeout: config.fetch_timeout(),
            delay: config.cover_delay(),
        }
    }

    /// Processes `jobs` in order, one at a time.
    ///
    /// A job only fails when the original cannot be downloaded or stored.
    /// Resize failures are logged and leave that width out of
    /// [`CoverAsset::derived`].
    pub async fn run(&self, jobs: &[CoverJob]) -> Vec<CoverOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());

        for (i, job) in jobs.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let outcome = match self.process(job).await {
                Ok(asset) => {
                    tracing::info!(
                        key = %job.key,
                        variants = asset.derived.len(),
                        "Cover OK"
                    );
                    CoverOutcome::Ready(asset)
                }
                Err(error) => {
                    tracing::warn!(
                        key = %job.key,
                        url = %job.source_url,
                        phase = "cover",
                        error = %error,
                        "Cover download failed"
                    );
                    CoverOutcome::Failed {
                        key: job.key.clone(),
                        error,
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn process(&self, job: &CoverJob) -> Result<CoverAsset, CoverError> {
        let bytes = self.download(&job.source_url).await?;
        let local_path = self.sink.cover_path(&job.key, &job.ext);
        tokio::fs::write(&local_path, &bytes).await?;

        let mut derived = BTreeMap::new();
        if self.widths.is_empty() {
            return Ok(CoverAsset {
                key: job.key.clone(),
                source_url: job.source_url.clone(),
                local_path,
                derived,
            });
        }

        let targets: Vec<(u32, PathBuf)> = self
            .widths
            .iter()
            .map(|&w| (w, self.sink.derived_cover_path(&job.key, &job.ext, w)))
            .collect();
        let quality = self.quality;

        // Decoding and resampling are CPU-bound
        let results = tokio::task::spawn_blocking(move || derive_variants(&bytes, &targets, quality))
            .await
            .map_err(|e| CoverError::Task(e.to_string()))?;

        let results = match results {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(
                    key = %job.key,
                    error = %e,
                    "Cover could not be decoded, keeping original only"
                );
                Vec::new()
            }
        };

        for (width, result) in results {
            match result {
                Ok(path) => {
                    derived.insert(width, path);
                }
                Err(e) => tracing::warn!(
                    key = %job.key,
                    width,
                    error = %e,
                    "Cover resize failed, keeping original only"
                ),
            }
        }

        Ok(CoverAsset {
            key: job.key.clone(),
            source_url: job.source_url.clone(),
            local_path,
            derived,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        read_limited_bytes(response, MAX_COVER_BYTES).await
    }
}

/// Decodes `original` once and writes one resized copy per target.
fn derive_variants(
    original: &[u8],
    targets: &[(u32, PathBuf)],
    quality: u8,
) -> Result<Vec<(u32, Result<PathBuf, CoverError>)>, CoverError> {
    let format = image::guess_format(original)?;
    let img = image::load_from_memory_with_format(original, format)?;

    Ok(targets
        .iter()
        .map(|(width, path)| {
            let result = write_resized(&img, format, *width, quality, path).map(|()| path.clone());
            (*width, result)
        })
        .collect())
}

/// Scales `img` to fit a `width`x`width` box and writes it in `format`.
/// JPEG output uses `quality`; other formats are written with their defaults.
fn write_resized(
    img: &DynamicImage,
    format: ImageFormat,
    width: u32,
    quality: u8,
    dst: &Path,
) -> Result<(), CoverError> {
    let resized = img.resize(width, width, FilterType::Lanczos3);
    let mut writer = std::io::BufWriter::new(std::fs::File::create(dst)?);

    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            DynamicImage::ImageRgb8(resized.to_rgb8()).write_with_encoder(encoder)?;
        }
        other => resized.write_to(&mut writer, other)?,
    }

    writer.flush()?;
    Ok(())
}
