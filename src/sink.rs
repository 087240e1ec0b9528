//! Filesystem layout of a build's output directory.
//!
//! ```text
//! <root>/
//!   rss/<key>.rss            raw feed documents
//!   cover/<key>.<ext>        original cover images
//!   cover/<key>-<w>.<ext>    resized covers
//!   build_info.json          the build artifact
//! ```
//!
//! The directory is wiped and recreated at the start of every run; nothing is
//! updated incrementally.
use std::io::Write;
use std::path::{Path, PathBuf};

const RSS_DIR: &str = "rss";
const COVER_DIR: &str = "cover";
const ARTIFACT_FILE: &str = "build_info.json";

/// Output directory for one run, plus the URL prefix under which the site
/// serves it.
#[derive(Debug, Clone)]
pub struct OutputSink {
    root: PathBuf,
    public_prefix: String,
}

impl OutputSink {
    pub fn new(root: impl Into<PathBuf>, public_prefix: &str) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Removes any previous output and recreates the directory tree.
    pub fn prepare(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => tracing::debug!(path = %self.root.display(), "Cleared previous output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        std::fs::create_dir_all(self.root.join(RSS_DIR))?;
        std::fs::create_dir_all(self.root.join(COVER_DIR))?;
        Ok(())
    }

    pub fn feed_path(&self, key: &str) -> PathBuf {
        self.root.join(RSS_DIR).join(format!("{key}.rss"))
    }

    pub fn cover_path(&self, key: &str, ext: &str) -> PathBuf {
        self.root.join(COVER_DIR).join(format!("{key}.{ext}"))
    }

    /// Path of a resized cover: `cover/<key>-<width>.<ext>`.
    pub fn derived_cover_path(&self, key: &str, ext: &str, width: u32) -> PathBuf {
        self.root.join(COVER_DIR).join(format!("{key}-{width}.{ext}"))
    }

    /// URL path under which the site serves the original cover.
    pub fn cover_public_path(&self, key: &str, ext: &str) -> String {
        format!("{}/{COVER_DIR}/{key}.{ext}", self.public_prefix)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(ARTIFACT_FILE)
    }

    /// Stores a raw feed body as `rss/<key>.rss`.
    pub async fn write_feed(&self, key: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.feed_path(key);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Writes `content` to `dst` via a temp file, fsync and rename, so the
/// destination is never observed half-written.
pub fn write_atomic(dst: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    // Randomized temp name: create_new below must never collide with a stale file
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;

    let written = temp_file
        .write_all(content)
        .and_then(|()| temp_file.sync_all());
    drop(temp_file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    // On Windows, rename fails if destination exists, so remove it first
    #[cfg(windows)]
    if dst.exists() {
        if let Err(e) = std::fs::remove_file(dst) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
    }

    std::fs::rename(&temp_path, dst).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let sink = OutputSink::new("/srv/out", "/downloads/");
        assert_eq!(sink.feed_path("rebuild"), Path::new("/srv/out/rss/rebuild.rss"));
        assert_eq!(
            sink.cover_path("rebuild", "jpg"),
            Path::new("/srv/out/cover/rebuild.jpg")
        );
        assert_eq!(
            sink.derived_cover_path("rebuild", "jpg", 120),
            Path::new("/srv/out/cover/rebuild-120.jpg")
        );
        assert_eq!(
            sink.cover_public_path("rebuild", "jpg"),
            "/downloads/cover/rebuild.jpg"
        );
        assert_eq!(
            sink.artifact_path(),
            Path::new("/srv/out/build_info.json")
        );
    }

    #[test]
    fn test_prepare_clears_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("downloads");
        let sink = OutputSink::new(&root, "/downloads");

        sink.prepare().unwrap();
        std::fs::write(root.join("rss").join("stale.rss"), b"old").unwrap();

        sink.prepare().unwrap();
        assert!(root.join("rss").is_dir());
        assert!(root.join("cover").is_dir());
        assert!(!root.join("rss").join("stale.rss").exists());
    }

    #[tokio::test]
    async fn test_write_feed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(dir.path(), "");
        sink.prepare().unwrap();

        let path = sink.write_feed("k", b"<rss/>").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"<rss/>");
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build_info.json");

        write_atomic(&path, b"{\"a\":1}").unwrap();
        write_atomic(&path, b"{\"a\":2}").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":2}");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file should not be left behind");
    }

    #[test]
    fn test_write_atomic_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("build_info.json");
        assert!(write_atomic(&path, b"{}").is_err());
    }
}
