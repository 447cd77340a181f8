//! Failover file configuration source
//!
//! A file source over a locally cached copy of remote content whose
//! validator is overridden to report the original remote's validator.
//! Once failover is no longer needed, a normal reload of the remote then
//! cleanly detects "changed" against the remote's last value rather than
//! the local copy's own mtime.

use async_trait::async_trait;

use crate::common::Result;

use super::file::FileSource;
use super::{ConfigSource, Fetched, SourceCore};

pub struct FailoverFileSource {
    inner: FileSource,
    remote_validator: Option<String>,
}

impl FailoverFileSource {
    /// Wrap the local copy at `path_url`, reporting `remote_validator` (the
    /// original remote's ETag or Last-Modified) as this source's validator.
    pub fn new(path_url: &str, remote_validator: Option<String>) -> Self {
        Self {
            inner: FileSource::new(path_url),
            remote_validator,
        }
    }
}

#[async_trait]
impl ConfigSource for FailoverFileSource {
    fn core(&self) -> &SourceCore {
        self.inner.core()
    }

    async fn fetch_if_modified(&self) -> Result<Option<Fetched>> {
        let fetched = self.inner.fetch_if_modified().await?;
        Ok(fetched.map(|mut f| {
            f.validator = self.remote_validator.clone();
            f.from_failover = true;
            f
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::load;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_reports_remote_validator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("copy.txt");
        fs::write(&path, "org.lockss.a=1\n").unwrap();

        let source = FailoverFileSource::new(
            path.to_str().unwrap(),
            Some("\"remote-etag\"".to_string()),
        );

        let generation = load(&source).await.unwrap();
        assert_eq!(generation.config.get("org.lockss.a"), Some("1"));
        assert_eq!(
            source.current_validator().as_deref(),
            Some("\"remote-etag\"")
        );
        assert!(source.core().state().from_failover);
    }
}
