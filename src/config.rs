//! Configuration file parser for `castsnap.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they
//! are most likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid JSON in sources file: {0}")]
    Json(#[from] serde_json::Error),

    /// Config or sources file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid source '{key}': {reason}")]
    InvalidSource { key: String, reason: String },

    #[error("Invalid setting '{0}': {1}")]
    InvalidValue(&'static str, String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Build configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that receives raw feeds, covers and `build_info.json`.
    pub output_dir: PathBuf,

    /// Sources file (`.toml` or `.json`).
    pub sources_path: PathBuf,

    /// URL prefix the site serves `output_dir` under; used for cover paths.
    pub public_path_prefix: String,

    /// Per-request timeout for feed downloads, in seconds.
    pub fetch_timeout_secs: u64,

    /// Retries for 429/5xx/incomplete responses. 0 disables retrying.
    pub max_retries: u32,

    /// First retry delay in milliseconds; doubles on each attempt.
    pub retry_base_delay_ms: u64,

    /// Largest accepted feed body, in bytes.
    pub max_feed_bytes: usize,

    /// Simultaneous feed fetches. 0 = all sources at once.
    pub max_concurrent_fetches: usize,

    pub user_agent: String,

    /// Size of the recent-episodes window, in days.
    pub recent_window_days: u32,

    /// Widths of the resized cover variants.
    pub cover_widths: Vec<u32>,

    /// JPEG quality (1-100) for resized covers.
    pub cover_quality: u8,

    /// Pause between consecutive cover downloads, in milliseconds.
    pub cover_delay_ms: u64,

    /// Largest fraction of failed sources that still counts as a successful
    /// run. 1.0 never fails the run because of source failures.
    pub max_failure_ratio: f64,

    /// Permit feed URLs on localhost and private networks.
    pub allow_private_hosts: bool,

    /// Skip the cover download/resize phase entirely.
    pub skip_covers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("static/downloads"),
            sources_path: PathBuf::from("data/rss.json"),
            public_path_prefix: "/downloads".to_string(),
            fetch_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_feed_bytes: 10 * 1024 * 1024,
            max_concurrent_fetches: 0,
            user_agent: concat!("castsnap/", env!("CARGO_PKG_VERSION")).to_string(),
            recent_window_days: 14,
            cover_widths: vec![120, 60],
            cover_quality: 100,
            cover_delay_ms: 0,
            max_failure_ratio: 1.0,
            allow_private_hosts: false,
            skip_covers: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    pub(crate) const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] = &[
        "output_dir",
        "sources_path",
        "public_path_prefix",
        "fetch_timeout_secs",
        "max_retries",
        "retry_base_delay_ms",
        "max_feed_bytes",
        "max_concurrent_fetches",
        "user_agent",
        "recent_window_days",
        "cover_widths",
        "cover_quality",
        "cover_delay_ms",
        "max_failure_ratio",
        "allow_private_hosts",
        "skip_covers",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::InvalidValue)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_bounded(path)? else {
            tracing::debug!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), output = %config.output_dir.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            return Err(ConfigError::InvalidValue(
                "max_failure_ratio",
                format!("{} is outside 0.0..=1.0", self.max_failure_ratio),
            ));
        }
        if !(1..=100).contains(&self.cover_quality) {
            return Err(ConfigError::InvalidValue(
                "cover_quality",
                format!("{} is outside 1..=100", self.cover_quality),
            ));
        }
        if let Some(w) = self.cover_widths.iter().find(|&&w| w == 0) {
            return Err(ConfigError::InvalidValue(
                "cover_widths",
                format!("width {w} is not allowed"),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "fetch_timeout_secs",
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn cover_delay(&self) -> Duration {
        Duration::from_millis(self.cover_delay_ms)
    }
}

/// Reads a whole file with the size guard applied. `Ok(None)` if it does not exist.
pub(crate) fn read_bounded(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > Config::MAX_FILE_SIZE => {
            return Err(ConfigError::TooLarge(format!(
                "{} is {} bytes (max {} bytes)",
                path.display(),
                meta.len(),
                Config::MAX_FILE_SIZE
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::Io(e)),
        Ok(_) => {}
    }

    match std::fs::read_to_string(path) {
        Ok(c) => Ok(Some(c)),
        // Race condition: file deleted between metadata and read
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Io(e)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("castsnap.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.output_dir, PathBuf::from("static/downloads"));
        assert_eq!(config.recent_window_days, 14);
        assert_eq!(config.cover_widths, vec![120, 60]);
        assert_eq!(config.max_concurrent_fetches, 0);
        assert_eq!(config.max_failure_ratio, 1.0);
        assert!(!config.allow_private_hosts);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.fetch_timeout_secs, 30);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("output_dir = \"public/data\"\nmax_retries = 0\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("public/data"));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.recent_window_days, 14); // default
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
output_dir = "out"
sources_path = "sources.toml"
public_path_prefix = "/static"
fetch_timeout_secs = 5
max_retries = 1
retry_base_delay_ms = 10
max_feed_bytes = 1024
max_concurrent_fetches = 4
user_agent = "test-agent"
recent_window_days = 7
cover_widths = [300, 100]
cover_quality = 85
cover_delay_ms = 250
max_failure_ratio = 0.25
allow_private_hosts = true
skip_covers = true
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.sources_path, PathBuf::from("sources.toml"));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_base_delay(), Duration::from_millis(10));
        assert_eq!(config.cover_delay(), Duration::from_millis(250));
        assert_eq!(config.cover_widths, vec![300, 100]);
        assert_eq!(config.cover_quality, 85);
        assert_eq!(config.max_failure_ratio, 0.25);
        assert!(config.allow_private_hosts);
        assert!(config.skip_covers);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("output_dir = \"out\"\ntotally_fake_key = 1\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("recent_window_days = \"two weeks\"\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let (_dir, path) = write_config("max_failure_ratio = 1.5\n");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidValue("max_failure_ratio", _))
        ));

        let (_dir, path) = write_config("cover_quality = 0\n");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidValue("cover_quality", _))
        ));

        let (_dir, path) = write_config("cover_widths = [120, 0]\n");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidValue("cover_widths", _))
        ));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }
}
