//! REST configuration service source
//!
//! Like the plain HTTP source but speaking the configuration service's
//! conditional read/write protocol: the validator is the service-provided
//! ETag, and writes are guarded by If-Match/If-None-Match preconditions
//! validated locally before any network call.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::StatusCode;

use crate::common::{ConfigError, Result};
use crate::config::ContentKind;
use crate::failover::RemoteFailoverStore;

use super::http::{refresh_failover_copy, substitute_from_failover};
use super::{ConfigSource, Fetched, SourceCore};

/// Token accepted by If-Match/If-None-Match meaning "any current state".
pub const ANY_STATE: &str = "*";

/// One precondition on a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Proceed only if the current version matches one of these tokens
    /// (`*` = any current state, a quoted token = exactly this version)
    IfMatch(Vec<String>),
    /// Proceed only if the current version matches none of these tokens
    IfNoneMatch(Vec<String>),
    /// Time-based precondition; not combinable with the ETag forms
    IfModifiedSince(DateTime<Utc>),
    /// Time-based precondition; not combinable with the ETag forms
    IfUnmodifiedSince(DateTime<Utc>),
}

/// Validate a precondition set before any network call.
///
/// If-Match combined with If-None-Match, or either combined with a
/// time-based precondition, is rejected as invalid.
pub fn validate_preconditions(preconditions: &[Precondition]) -> Result<()> {
    let has_if_match = preconditions
        .iter()
        .any(|p| matches!(p, Precondition::IfMatch(_)));
    let has_if_none_match = preconditions
        .iter()
        .any(|p| matches!(p, Precondition::IfNoneMatch(_)));
    let has_time_based = preconditions.iter().any(|p| {
        matches!(
            p,
            Precondition::IfModifiedSince(_) | Precondition::IfUnmodifiedSince(_)
        )
    });

    if has_if_match && has_if_none_match {
        return Err(ConfigError::Malformed(
            "cannot combine If-Match with If-None-Match".to_string(),
        ));
    }
    if (has_if_match || has_if_none_match) && has_time_based {
        return Err(ConfigError::Malformed(
            "cannot combine an ETag precondition with a time-based one".to_string(),
        ));
    }
    Ok(())
}

pub struct RestServiceSource {
    core: SourceCore,
    client: reqwest::Client,
    failover: Option<Arc<RemoteFailoverStore>>,
}

impl RestServiceSource {
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

    /// Conditional write guarded by `preconditions`.
    ///
    /// A service refusal (412) surfaces as `PreconditionFailed`; a
    /// successful write records the new ETag as the source's validator.
    pub async fn put_conditional(
        &self,
        content: Bytes,
        preconditions: &[Precondition],
    ) -> Result<()> {
        validate_preconditions(preconditions)?;

        let mut request = self.client.put(self.url()).body(content);
        for precondition in preconditions {
            request = match precondition {
                Precondition::IfMatch(tokens) => request.header(IF_MATCH, tokens.join(", ")),
                Precondition::IfNoneMatch(tokens) => {
                    request.header(IF_NONE_MATCH, tokens.join(", "))
                }
                Precondition::IfModifiedSince(when) => {
                    request.header("If-Modified-Since", when.to_rfc2822())
                }
                Precondition::IfUnmodifiedSince(when) => {
                    request.header("If-Unmodified-Since", when.to_rfc2822())
                }
            };
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConfigError::TransientIo(format!("{}: {}", self.url(), e)))?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => Err(ConfigError::PreconditionFailed(
                self.url().to_string(),
            )),
            status if status.is_success() => {
                let etag = header_string(&response, ETAG.as_str());
                // The cached snapshot no longer reflects the stored content
                self.core.swap_state(move |s| {
                    if let Some(etag) = etag {
                        s.validator = Some(etag);
                    }
                    s.config = None;
                });
                debug!("stored configuration to {}", self.url());
                Ok(())
            }
            status => Err(ConfigError::TransientIo(format!(
                "{}: HTTP {}",
                self.url(),
                status
            ))),
        }
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[async_trait]
impl ConfigSource for RestServiceSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn fetch_if_modified(&self) -> Result<Option<Fetched>> {
        let mut request = self.client.get(self.url());
        if let Some(etag) = self.current_validator() {
            request = request.header(IF_NONE_MATCH, etag);
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
                self.core.swap_state(|s| s.from_failover = false);
                Ok(None)
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(ConfigError::NotFound(self.url().to_string()))
            }
            status if status.is_success() => {
                let etag = header_string(&response, ETAG.as_str());
                let last_modified = header_string(&response, "last-modified");
                let validator = etag
                    .clone()
                    .or_else(|| last_modified.clone())
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
                    etag,
                    last_modified,
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

    async fn store(&self, content: Bytes) -> Result<()> {
        // Update exactly the version we last saw; create if never loaded
        let preconditions = match self.current_validator() {
            Some(etag) => vec![Precondition::IfMatch(vec![etag])],
            None => vec![Precondition::IfNoneMatch(vec![ANY_STATE.to_string()])],
        };
        self.put_conditional(content, &preconditions).await
    }
}
