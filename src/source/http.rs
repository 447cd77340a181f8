//! HTTP configuration source
//!
//! Validator is the server-asserted `Last-Modified`, acquired via a
//! conditional GET. On a transient fetch failure the source consults the
//! remote failover store and transparently substitutes a checksum-verified
//! local copy; on every successful live fetch it refreshes that copy
//! opportunistically through a hashing, gzip-compressing tee.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, warn};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;

use crate::common::{ConfigError, Result};
use crate::config::ContentKind;
use crate::failover::RemoteFailoverStore;

use super::{ConfigSource, Fetched, SourceCore};

pub struct HttpSource {
    core: SourceCore,
    client: reqwest::Client,
    failover: Option<Arc<RemoteFailoverStore>>,
}

impl HttpSource {
    pub fn new(
        url: &str,
        client: reqwest::Client,
        failover: Option<Arc<RemoteFailoverStore>>,
    ) -> Self {
        Self {
            core: SourceCore::new(url, ContentKind::from_url(url), false),
            client,
            failover,
        }
    }

    /// Flag the source as carrying platform bootstrap values.
    pub fn platform(mut self) -> Self {
        let url = self.core.url().to_string();
        let kind = self.core.content_kind();
        self.core = SourceCore::new(url, kind, true);
        self
    }
}

#[async_trait]
impl ConfigSource for HttpSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn fetch_if_modified(&self) -> Result<Option<Fetched>> {
        let mut request = self.client.get(self.url());
        if let Some(validator) = self.current_validator() {
            request = request.header(IF_MODIFIED_SINCE, validator);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let original = ConfigError::TransientIo(format!("{}: {}", self.url(), e));
                return match substitute_from_failover(self.url(), self.failover.as_deref()) {
                    Some(fetched) => Ok(Some(fetched)),
                    None => Err(original),
                };
            }
        };

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                // A live not-modified response clears the failover flag
                self.core.swap_state(|s| s.from_failover = false);
                Ok(None)
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(ConfigError::NotFound(self.url().to_string()))
            }
            status if status.is_success() => {
                let validator = response
                    .headers()
                    .get(LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| Utc::now().to_rfc2822());

                let content = match response.bytes().await {
                    Ok(content) => content,
                    Err(e) => {
                        let original =
                            ConfigError::TransientIo(format!("{}: body read: {}", self.url(), e));
                        return match substitute_from_failover(
                            self.url(),
                            self.failover.as_deref(),
                        ) {
                            Some(fetched) => Ok(Some(fetched)),
                            None => Err(original),
                        };
                    }
                };

                refresh_failover_copy(
                    self.failover.as_deref(),
                    self.url(),
                    &content,
                    None,
                    Some(validator.clone()),
                );
                Ok(Some(Fetched::new(content, Some(validator))))
            }
            status => {
                let original =
                    ConfigError::TransientIo(format!("{}: HTTP {}", self.url(), status));
                match substitute_from_failover(self.url(), self.failover.as_deref()) {
                    Some(fetched) => Ok(Some(fetched)),
                    None => Err(original),
                }
            }
        }
    }
}

/// Look up a verified local copy for a remote URL that just failed.
///
/// Returns `None` on any sub-failure (no record, checksum mismatch, missing
/// required checksum, stale copy) so the caller propagates the original
/// transient error rather than a failover-specific one.
pub(crate) fn substitute_from_failover(
    url: &str,
    store: Option<&RemoteFailoverStore>,
) -> Option<Fetched> {
    let copy = store?.find_copy(url)?;
    let validator = copy
        .last_modified
        .clone()
        .or_else(|| copy.etag.clone())
        .or_else(|| copy.stored_at.map(|t| t.to_rfc2822()));
    Some(Fetched {
        content: Bytes::from(copy.content),
        validator,
        from_failover: true,
    })
}

/// Opportunistically refresh the failover copy after a successful live
/// fetch. Failures are logged, never surfaced to the fetch.
pub(crate) fn refresh_failover_copy(
    store: Option<&RemoteFailoverStore>,
    url: &str,
    content: &[u8],
    etag: Option<String>,
    last_modified: Option<String>,
) {
    let store = match store {
        Some(store) => store,
        None => return,
    };
    let result = store.begin_write(url).and_then(|mut writer| {
        writer.write_all(content)?;
        store.commit_write(writer, etag, last_modified)
    });
    match result {
        Ok(record) => debug!("refreshed failover copy of {} (seq {})", url, record.seq),
        Err(e) => warn!("failed to refresh failover copy of {}: {}", url, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::FailoverSettings;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unreachable_without_failover_is_transient() {
        // Port 9 is discard; nothing listens there in the test environment
        let source = HttpSource::new(
            "http://127.0.0.1:9/lockss.xml",
            reqwest::Client::new(),
            None,
        );
        let err = source.fetch_if_modified().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_with_failover_substitutes() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap(),
        );
        let url = "http://127.0.0.1:9/lockss.xml";

        let mut writer = store.begin_write(url).unwrap();
        writer.write_all(b"org.lockss.cached=yes\n").unwrap();
        store
            .commit_write(writer, None, Some("Mon, 01 Jan 2024 00:00:00 GMT".into()))
            .unwrap();

        let source = HttpSource::new(url, reqwest::Client::new(), Some(Arc::clone(&store)));
        let fetched = source
            .fetch_if_modified()
            .await
            .unwrap()
            .expect("failover content");
        assert!(fetched.from_failover);
        assert_eq!(&fetched.content[..], b"org.lockss.cached=yes\n");
        assert_eq!(
            fetched.validator.as_deref(),
            Some("Mon, 01 Jan 2024 00:00:00 GMT")
        );
    }

    #[tokio::test]
    async fn test_corrupt_failover_propagates_original_error() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap(),
        );
        let url = "http://127.0.0.1:9/lockss.xml";

        let mut writer = store.begin_write(url).unwrap();
        writer.write_all(b"original").unwrap();
        let record = store.commit_write(writer, None, None).unwrap();

        // Corrupt the copy so checksum verification fails
        let path = dir.path().join(record.filename.unwrap());
        std::fs::write(&path, crate::common::fs::gzip(b"tampered").unwrap()).unwrap();

        let source = HttpSource::new(url, reqwest::Client::new(), Some(store));
        let err = source.fetch_if_modified().await.unwrap_err();
        assert!(err.is_transient(), "original transient error propagates");
    }
}
