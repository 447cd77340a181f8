//! Configuration sources
//!
//! The polymorphic unit of loadable configuration content. Each variant
//! wraps one transport (file, HTTP, REST service, bundled resource,
//! generated content) behind the common [`ConfigSource`] contract, and a
//! [`SourceCache`] guarantees at most one source instance per URL.

pub mod cache;
pub mod dynamic;
pub mod failover_file;
pub mod file;
pub mod http;
pub mod resource;
pub mod rest;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;

use crate::common::{ConfigError, Result};
use crate::config::{parse, Configuration, ContentKind, KeyPredicate};
use crate::manager::generation::Generation;

pub use cache::SourceCache;
pub use dynamic::DynamicSource;
pub use failover_file::FailoverFileSource;
pub use file::FileSource;
pub use http::HttpSource;
pub use resource::ResourceSource;
pub use rest::{Precondition, RestServiceSource};

/// Result of a fetch that found new content.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Raw content bytes
    pub content: Bytes,
    /// New validator value asserted by the transport, if any
    pub validator: Option<String>,
    /// True if the content came from the local failover cache
    pub from_failover: bool,
}

impl Fetched {
    pub fn new(content: Bytes, validator: Option<String>) -> Self {
        Self {
            content,
            validator,
            from_failover: false,
        }
    }
}

/// Mutable per-source state, swapped as one immutable snapshot so readers
/// never observe a torn mix of old and new fields.
#[derive(Debug, Clone, Default)]
pub struct SourceState {
    /// Opaque, transport-specific change token
    pub validator: Option<String>,
    /// Text of the last load error, cleared on success
    pub last_error: Option<String>,
    /// Timestamp of the last fetch attempt (success or failure)
    pub last_attempt: Option<DateTime<Utc>>,
    /// Incremented every time the parsed content actually changes
    pub generation: u64,
    /// Cached parsed snapshot of the last successful load
    pub config: Option<Arc<Configuration>>,
    /// True while the cached content was substituted from failover
    pub from_failover: bool,
}

/// Identity and shared state embedded in every source variant.
pub struct SourceCore {
    url: String,
    kind: ContentKind,
    platform: bool,
    state: RwLock<Arc<SourceState>>,
    predicate: RwLock<KeyPredicate>,
}

impl SourceCore {
    pub fn new(url: impl Into<String>, kind: ContentKind, platform: bool) -> Self {
        Self {
            url: url.into(),
            kind,
            platform,
            state: RwLock::new(Arc::new(SourceState::default())),
            predicate: RwLock::new(KeyPredicate::accept_all()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn content_kind(&self) -> ContentKind {
        self.kind
    }

    pub fn is_platform_source(&self) -> bool {
        self.platform
    }

    /// Current state snapshot.
    pub fn state(&self) -> Arc<SourceState> {
        Arc::clone(&self.state.read().unwrap())
    }

    /// Replace the state with a transformed copy of the current snapshot.
    pub fn swap_state(&self, f: impl FnOnce(&mut SourceState)) {
        let mut guard = self.state.write().unwrap();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    pub fn key_predicate(&self) -> KeyPredicate {
        self.predicate.read().unwrap().clone()
    }

    pub fn set_key_predicate(&self, predicate: KeyPredicate) {
        *self.predicate.write().unwrap() = predicate;
    }
}

/// Common contract implemented by every source variant.
///
/// `fetch_if_modified` returns `Ok(None)` when the underlying content has
/// not changed since the stored validator was recorded; it is safe to call
/// repeatedly and must not assume clock precision finer than the
/// transport's validator granularity.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Shared identity and state.
    fn core(&self) -> &SourceCore;

    /// Fetch new raw content, or `None` if unchanged.
    async fn fetch_if_modified(&self) -> Result<Option<Fetched>>;

    /// Write content back through this source. Only writable variants
    /// override this.
    async fn store(&self, _content: Bytes) -> Result<()> {
        Err(ConfigError::Other(format!(
            "{} is read-only",
            self.core().url()
        )))
    }

    fn url(&self) -> &str {
        self.core().url()
    }

    fn content_kind(&self) -> ContentKind {
        self.core().content_kind()
    }

    /// True if this source may carry bootstrap/platform values needed
    /// before the rest of configuration can be parsed.
    fn is_platform_source(&self) -> bool {
        self.core().is_platform_source()
    }

    /// Opaque change token, total once loaded.
    fn current_validator(&self) -> Option<String> {
        self.core().state().validator.clone()
    }

    fn generation(&self) -> u64 {
        self.core().state().generation
    }

    fn cached_config(&self) -> Option<Arc<Configuration>> {
        self.core().state().config.clone()
    }

    /// Forget the stored validator so the next fetch is unconditional.
    fn forget_validator(&self) {
        self.core().swap_state(|s| s.validator = None);
    }
}

/// Full load flow shared by all variants: fetch, parse, filter through the
/// source's key predicate, bump the generation counter only when the parsed
/// content actually changed, and capture a [`Generation`].
pub async fn load(source: &dyn ConfigSource) -> Result<Generation> {
    let core = source.core();
    core.swap_state(|s| s.last_attempt = Some(Utc::now()));

    let mut fetched = match source.fetch_if_modified().await {
        Ok(fetched) => fetched,
        Err(e) => {
            if !e.is_interrupt() {
                core.swap_state(|s| s.last_error = Some(e.to_string()));
            }
            return Err(e);
        }
    };

    // A write records the new validator but drops the parsed snapshot, so
    // an "unchanged" answer without a snapshot means re-read
    if fetched.is_none() && core.state().config.is_none() {
        debug!("{}: no cached snapshot, re-reading unconditionally", core.url());
        source.forget_validator();
        fetched = match source.fetch_if_modified().await {
            Ok(fetched) => fetched,
            Err(e) => {
                if !e.is_interrupt() {
                    core.swap_state(|s| s.last_error = Some(e.to_string()));
                }
                return Err(e);
            }
        };
    }

    match fetched {
        None => {
            // Unchanged; reuse the cached snapshot
            let state = core.state();
            match &state.config {
                Some(config) => Ok(Generation::new(
                    core.url(),
                    Arc::clone(config),
                    state.generation,
                )),
                None => Err(ConfigError::Other(format!(
                    "{}: unchanged but never loaded",
                    core.url()
                ))),
            }
        }
        Some(fetched) => {
            let parsed = match parse(core.content_kind(), &fetched.content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    core.swap_state(|s| s.last_error = Some(e.to_string()));
                    return Err(e);
                }
            };
            let filtered = match core.key_predicate().filter(parsed, core.url()) {
                Ok(filtered) => filtered,
                Err(e) => {
                    core.swap_state(|s| s.last_error = Some(e.to_string()));
                    return Err(e);
                }
            };

            let state = core.state();
            let changed = match &state.config {
                Some(previous) => !previous.same_values(&filtered),
                None => true,
            };
            let generation = if changed {
                state.generation + 1
            } else {
                state.generation
            };
            if changed {
                debug!(
                    "{}: content changed, generation {} -> {}",
                    core.url(),
                    state.generation,
                    generation
                );
            }

            let config = Arc::new(filtered);
            let config_for_state = Arc::clone(&config);
            core.swap_state(move |s| {
                s.validator = fetched.validator.clone().or_else(|| s.validator.take());
                s.last_error = None;
                s.generation = generation;
                s.config = Some(config_for_state);
                s.from_failover = fetched.from_failover;
            });

            Ok(Generation::new(core.url(), config, generation))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredicateFailurePolicy;

    struct FixedSource {
        core: SourceCore,
        content: std::sync::Mutex<Bytes>,
        serve_unchanged: std::sync::atomic::AtomicBool,
    }

    impl FixedSource {
        fn new(url: &str, content: &str) -> Self {
            Self {
                core: SourceCore::new(url, ContentKind::Properties, false),
                content: std::sync::Mutex::new(Bytes::from(content.to_string())),
                serve_unchanged: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn set_content(&self, content: &str) {
            *self.content.lock().unwrap() = Bytes::from(content.to_string());
            self.serve_unchanged
                .store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ConfigSource for FixedSource {
        fn core(&self) -> &SourceCore {
            &self.core
        }

        async fn fetch_if_modified(&self) -> Result<Option<Fetched>> {
            if self
                .serve_unchanged
                .swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                return Ok(None);
            }
            Ok(Some(Fetched::new(
                self.content.lock().unwrap().clone(),
                Some("v1".to_string()),
            )))
        }
    }

    #[tokio::test]
    async fn test_load_bumps_generation_only_on_change() {
        let source = FixedSource::new("test:fixed", "a=1\n");

        let g1 = load(&source).await.unwrap();
        assert_eq!(g1.generation, 1);
        assert_eq!(g1.config.get("a"), Some("1"));

        // Unchanged fetch reuses the snapshot and counter
        let g2 = load(&source).await.unwrap();
        assert_eq!(g2.generation, 1);

        // Same bytes re-served: still no counter bump
        source.set_content("a=1\n");
        let g3 = load(&source).await.unwrap();
        assert_eq!(g3.generation, 1);

        // Different content bumps
        source.set_content("a=2\n");
        let g4 = load(&source).await.unwrap();
        assert_eq!(g4.generation, 2);
        assert_eq!(g4.config.get("a"), Some("2"));
    }

    #[tokio::test]
    async fn test_load_applies_predicate() {
        let source = FixedSource::new("test:titledb", "org.lockss.ui.port=8081\n");
        source.core().set_key_predicate(KeyPredicate::namespace(
            &["org.lockss.title"],
            PredicateFailurePolicy::RejectFile,
        ));

        let err = load(&source).await.unwrap_err();
        assert!(matches!(err, ConfigError::PolicyRejected(_)));
        assert!(source.core().state().last_error.is_some());
    }

    #[tokio::test]
    async fn test_state_snapshot_consistency() {
        let source = FixedSource::new("test:fixed", "a=1\n");
        load(&source).await.unwrap();

        let state = source.core().state();
        assert_eq!(state.generation, 1);
        assert_eq!(state.validator.as_deref(), Some("v1"));
        assert!(state.last_error.is_none());
        assert!(state.last_attempt.is_some());
    }
}
