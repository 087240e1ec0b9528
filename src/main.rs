use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use castsnap::config::Config;
use castsnap::pipeline;
use castsnap::sources::load_sources;

#[derive(Parser, Debug)]
#[command(
    name = "castsnap",
    version,
    about = "Fetch podcast feeds and write build_info.json for the site build"
)]
struct Args {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, value_name = "FILE", default_value = "castsnap.toml")]
    config: PathBuf,

    /// Sources file (.toml or .json); overrides `sources_path`
    #[arg(long, value_name = "FILE")]
    sources: Option<PathBuf>,

    /// Output directory; overrides `output_dir`
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Fail the run when more than this fraction of sources fail (0.0-1.0)
    #[arg(long, value_name = "R", conflicts_with = "keep_going")]
    max_failure_ratio: Option<f64>,

    /// Never fail the run because of source failures
    #[arg(long)]
    keep_going: bool,

    /// Do not download or resize covers
    #[arg(long)]
    skip_covers: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(sources) = &self.sources {
            config.sources_path = sources.clone();
        }
        if let Some(out) = &self.out {
            config.output_dir = out.clone();
        }
        if let Some(ratio) = self.max_failure_ratio {
            config.max_failure_ratio = ratio;
        }
        if self.keep_going {
            config.max_failure_ratio = 1.0;
        }
        if self.skip_covers {
            config.skip_covers = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    args.apply(&mut config);
    config.validate().context("Invalid command-line override")?;

    let sources = load_sources(&config.sources_path, config.allow_private_hosts).with_context(
        || format!("Failed to load sources from {}", config.sources_path.display()),
    )?;

    let client = pipeline::build_client(&config).context("Failed to build HTTP client")?;

    let report = match pipeline::run(&config, &sources, &client, Utc::now()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Build failed");
            return Ok(ExitCode::FAILURE);
        }
    };

    for failure in &report.failures {
        tracing::warn!(
            key = %failure.key,
            phase = failure.error.phase(),
            error = %failure.error,
            "Source excluded"
        );
    }

    tracing::info!(
        path = %report.artifact_path.display(),
        channels = report.artifact.channels.len(),
        failed = report.failures.len(),
        covers_failed = report.cover_failures.len(),
        "Build complete"
    );

    if report.exceeds(config.max_failure_ratio) {
        tracing::error!(
            ratio = report.failure_ratio(),
            max = config.max_failure_ratio,
            "Too many sources failed"
        );
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "castsnap",
            "--sources",
            "feeds.json",
            "--out",
            "public/dl",
            "--max-failure-ratio",
            "0.5",
            "--skip-covers",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.sources_path, PathBuf::from("feeds.json"));
        assert_eq!(config.output_dir, PathBuf::from("public/dl"));
        assert_eq!(config.max_failure_ratio, 0.5);
        assert!(config.skip_covers);
    }

    #[test]
    fn test_keep_going_conflicts_with_ratio() {
        let result = Args::try_parse_from(["castsnap", "--keep-going", "--max-failure-ratio", "0.1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_leave_config_alone() {
        let args = Args::parse_from(["castsnap"]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.output_dir, Config::default().output_dir);
        assert!(!config.skip_covers);
    }
}
