//! Dynamically generated configuration source
//!
//! Content is computed on demand by a supplied generator function rather
//! than fetched externally. The validator is the wall-clock time of the
//! last generation; `invalidate` forces the next read to regenerate.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use log::debug;

use crate::common::Result;
use crate::config::ContentKind;

use super::{ConfigSource, Fetched, SourceCore};

/// URL scheme prefix for dynamic sources.
pub const DYNAMIC_PREFIX: &str = "dyn:";

/// Generator callback producing the source's raw content.
pub type Generator = Box<dyn Fn() -> Result<Bytes> + Send + Sync>;

pub struct DynamicSource {
    core: SourceCore,
    generator: Generator,
    stale: AtomicBool,
}

impl DynamicSource {
    pub fn new(url: &str, kind: ContentKind, generator: Generator) -> Self {
        Self {
            core: SourceCore::new(url, kind, false),
            generator,
            stale: AtomicBool::new(true),
        }
    }

    /// Force the next read to regenerate rather than reuse the cached
    /// materialization.
    pub fn invalidate(&self) {
        debug!("{}: invalidated, next read regenerates", self.url());
        self.stale.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigSource for DynamicSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn fetch_if_modified(&self) -> Result<Option<Fetched>> {
        if !self.stale.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        let content = match (self.generator)() {
            Ok(content) => content,
            Err(e) => {
                // Stay stale so the next read retries the generator
                self.stale.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };
        let validator = Utc::now().timestamp_millis().to_string();
        Ok(Some(Fetched::new(content, Some(validator))))
    }
}
