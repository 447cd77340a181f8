//! Bundled resource configuration source
//!
//! Content compiled into (or registered with) the binary, addressed as
//! `resource:<name>`. Read-only; the validator is a constant build
//! fingerprint since bundled content can only change with the binary.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::common::{ConfigError, Result};
use crate::config::ContentKind;

use super::{ConfigSource, Fetched, SourceCore};

/// URL scheme prefix for bundled resources.
pub const RESOURCE_PREFIX: &str = "resource:";

static REGISTRY: Lazy<RwLock<HashMap<String, Bytes>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Register bundled content under `resource:<name>`.
///
/// Called at startup for content embedded via `include_bytes!`, and by
/// tests to stage fixtures.
pub fn register_resource(name: &str, content: impl Into<Bytes>) {
    REGISTRY
        .write()
        .unwrap()
        .insert(name.to_string(), content.into());
}

fn lookup_resource(name: &str) -> Option<Bytes> {
    REGISTRY.read().unwrap().get(name).cloned()
}

pub struct ResourceSource {
    core: SourceCore,
    name: String,
}

impl ResourceSource {
    pub fn new(url: &str) -> Self {
        let name = url.strip_prefix(RESOURCE_PREFIX).unwrap_or(url).to_string();
        // Bundled resources commonly carry platform bootstrap values
        Self {
            core: SourceCore::new(url, ContentKind::from_url(url), true),
            name,
        }
    }
}

#[async_trait]
impl ConfigSource for ResourceSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn fetch_if_modified(&self) -> Result<Option<Fetched>> {
        let validator = format!("builtin:{}", env!("CARGO_PKG_VERSION"));
        if self.current_validator().as_deref() == Some(validator.as_str()) {
            return Ok(None);
        }
        match lookup_resource(&self.name) {
            Some(content) => Ok(Some(Fetched::new(content, Some(validator)))),
            None => Err(ConfigError::NotFound(format!(
                "bundled resource {:?}",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::load;

    #[tokio::test]
    async fn test_resource_fetch_and_unchanged() {
        register_resource("test-platform.txt", &b"org.lockss.platform.group=test\n"[..]);

        let source = ResourceSource::new("resource:test-platform.txt");
        assert!(source.is_platform_source());

        let generation = load(&source).await.unwrap();
        assert_eq!(
            generation.config.get("org.lockss.platform.group"),
            Some("test")
        );

        // Constant validator: second fetch is unchanged
        assert!(source.fetch_if_modified().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_resource_not_found() {
        let source = ResourceSource::new("resource:nonexistent.txt");
        let err = source.fetch_if_modified().await.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
