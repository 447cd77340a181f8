//! Local file configuration source
//!
//! Validator is the file modification time. Reads transparently decompress
//! a `.gz` suffix; writes go through a sibling temp file and a durable
//! rename so a concurrent reader never observes a partially-written file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;

use crate::common::fs::{atomic_write, mtime_millis, read_maybe_gzip};
use crate::common::{ConfigError, Result};
use crate::config::ContentKind;

use super::{ConfigSource, Fetched, SourceCore};

/// Filename suffix marking a file that is allowed to be silently absent.
pub const OPTIONAL_SUFFIX: &str = ".opt";

/// Validator value reported while an optional file is absent.
const ABSENT_VALIDATOR: &str = "absent";

pub struct FileSource {
    core: SourceCore,
    path: PathBuf,
    optional: bool,
}

impl FileSource {
    pub fn new(url: &str) -> Self {
        Self::with_kind(url, ContentKind::from_url(url), false)
    }

    /// A file source flagged as carrying platform bootstrap values.
    pub fn new_platform(url: &str) -> Self {
        Self::with_kind(url, ContentKind::from_url(url), true)
    }

    pub fn with_kind(url: &str, kind: ContentKind, platform: bool) -> Self {
        let path = PathBuf::from(url.strip_prefix("file:").unwrap_or(url));
        let optional = url.ends_with(OPTIONAL_SUFFIX);
        Self {
            core: SourceCore::new(url, kind, platform),
            path,
            optional,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn fetch_if_modified(&self) -> Result<Option<Fetched>> {
        let previous = self.current_validator();

        let validator = match mtime_millis(&self.path) {
            Ok(millis) => millis.to_string(),
            Err(ConfigError::NotFound(_)) if self.optional => {
                // An absent optional file contributes an empty configuration
                if previous.as_deref() == Some(ABSENT_VALIDATOR) {
                    return Ok(None);
                }
                debug!("optional file {} absent, treating as empty", self.url());
                return Ok(Some(Fetched::new(
                    Bytes::new(),
                    Some(ABSENT_VALIDATOR.to_string()),
                )));
            }
            Err(e) => return Err(e),
        };

        if previous.as_deref() == Some(validator.as_str()) {
            return Ok(None);
        }

        let content = read_maybe_gzip(&self.path)?;
        Ok(Some(Fetched::new(Bytes::from(content), Some(validator))))
    }

    async fn store(&self, content: Bytes) -> Result<()> {
        atomic_write(&self.path, &content)?;
        let validator = mtime_millis(&self.path)?.to_string();
        // The parsed snapshot no longer reflects the file; the next load
        // re-reads instead of reporting unchanged
        self.core.swap_state(|s| {
            s.validator = Some(validator);
            s.config = None;
            s.last_error = None;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::load;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fetch_and_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lockss.txt");
        fs::write(&path, "org.lockss.a=1\n").unwrap();

        let source = FileSource::new(path.to_str().unwrap());
        let first = source.fetch_if_modified().await.unwrap();
        assert!(first.is_some());

        // Validator must be recorded through the load flow for the second
        // call to observe it
        load(&source).await.unwrap();
        let second = source.fetch_if_modified().await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let source = FileSource::new(path.to_str().unwrap());

        source
            .store(Bytes::from_static(b"org.lockss.k=v\n"))
            .await
            .unwrap();
        let before = source.current_validator().expect("validator after write");

        let generation = load(&source).await.unwrap();
        assert_eq!(generation.config.get("org.lockss.k"), Some("v"));

        // A later rewrite changes the validator and is read back, not
        // served from the stale snapshot
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        filetime_touch(&path);
        source
            .store(Bytes::from_static(b"org.lockss.k=w\n"))
            .await
            .unwrap();
        let after = source.current_validator().unwrap();
        assert_ne!(before, after);

        let generation = load(&source).await.unwrap();
        assert_eq!(generation.config.get("org.lockss.k"), Some("w"));
    }

    // Rewrites with identical mtime granularity can be flaky; force a
    // distinct timestamp by waiting past the filesystem resolution.
    fn filetime_touch(_path: &Path) {
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_missing_required_file_is_not_found() {
        let dir = tempdir().unwrap();
        let source = FileSource::new(dir.path().join("absent.txt").to_str().unwrap());
        let err = source.fetch_if_modified().await.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_optional_file_is_empty() {
        let dir = tempdir().unwrap();
        let source = FileSource::new(dir.path().join("expert.txt.opt").to_str().unwrap());
        assert!(source.is_optional());

        let generation = load(&source).await.unwrap();
        assert!(generation.config.is_empty());

        // Second fetch reports unchanged rather than re-serving emptiness
        assert!(source.fetch_if_modified().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gzip_suffix_decompressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("props.txt.gz");
        fs::write(&path, crate::common::fs::gzip(b"org.lockss.z=9\n").unwrap()).unwrap();

        let source = FileSource::new(path.to_str().unwrap());
        let generation = load(&source).await.unwrap();
        assert_eq!(generation.config.get("org.lockss.z"), Some("9"));
    }
}
