//! Source cache
//!
//! Registry mapping a canonical URL string to exactly one source instance,
//! created lazily by classifying the URL. Classification order matters and
//! is an explicit priority list: dynamic scheme, bundled resource, REST
//! service, generic HTTP, archive, local file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::common::{ConfigError, Result};
use crate::failover::RemoteFailoverStore;

use super::dynamic::DYNAMIC_PREFIX;
use super::resource::RESOURCE_PREFIX;
use super::{ConfigSource, FileSource, HttpSource, ResourceSource, RestServiceSource};

/// Transport classification of a URL, a pure function of the URL's
/// scheme/pattern plus the cache's REST-service bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Dynamic,
    Resource,
    RestService,
    Http,
    Archive,
    File,
}

pub struct SourceCache {
    client: reqwest::Client,
    failover: Option<Arc<RemoteFailoverStore>>,
    /// Base URL of the configuration REST service this node is a client of
    rest_service_base: Option<String>,
    /// One coordinating lock around the create-if-absent check
    entries: Mutex<HashMap<String, Arc<dyn ConfigSource>>>,
    /// child URL -> parent URL, recorded during reference resolution
    parents: Mutex<HashMap<String, String>>,
}

impl SourceCache {
    pub fn new(
        client: reqwest::Client,
        failover: Option<Arc<RemoteFailoverStore>>,
        rest_service_base: Option<String>,
    ) -> Self {
        Self {
            client,
            failover,
            rest_service_base: rest_service_base
                .map(|base| base.trim_end_matches('/').to_string() + "/"),
            entries: Mutex::new(HashMap::new()),
            parents: Mutex::new(HashMap::new()),
        }
    }

    /// Return the unique source for `url`, creating it on first reference.
    pub fn find(&self, url: &str) -> Result<Arc<dyn ConfigSource>> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(url) {
            return Ok(Arc::clone(existing));
        }

        let kind = self.classify(url);
        debug!("creating {:?} source for {}", kind, url);
        let source: Arc<dyn ConfigSource> = match kind {
            SourceKind::Dynamic => {
                // Dynamic sources carry a generator and must be installed
                // explicitly before first reference
                return Err(ConfigError::Other(format!(
                    "dynamic source {} not registered",
                    url
                )));
            }
            SourceKind::Resource => Arc::new(ResourceSource::new(url)),
            SourceKind::RestService => Arc::new(RestServiceSource::new(
                url,
                self.client.clone(),
                self.failover.clone(),
            )),
            SourceKind::Http => Arc::new(HttpSource::new(
                url,
                self.client.clone(),
                self.failover.clone(),
            )),
            SourceKind::Archive => {
                return Err(ConfigError::Malformed(format!(
                    "archive urls are not supported: {}",
                    url
                )));
            }
            SourceKind::File => Arc::new(FileSource::new(url)),
        };

        entries.insert(url.to_string(), Arc::clone(&source));
        Ok(source)
    }

    /// Pre-register a source (dynamic and bundled sources, tests).
    pub fn install(&self, source: Arc<dyn ConfigSource>) {
        let url = source.url().to_string();
        self.entries.lock().unwrap().insert(url, source);
    }

    /// Record that `parent` references `child`, used to classify whether a
    /// child URL belongs to the same REST service as its parent.
    pub fn note_reference(&self, parent: &str, child: &str) {
        self.parents
            .lock()
            .unwrap()
            .insert(child.to_string(), parent.to_string());
    }

    /// Classify a URL. Priority: dynamic scheme, bundled resource, REST
    /// service, generic HTTP, archive, else local file.
    pub fn classify(&self, url: &str) -> SourceKind {
        if url.starts_with(DYNAMIC_PREFIX) {
            SourceKind::Dynamic
        } else if url.starts_with(RESOURCE_PREFIX) {
            SourceKind::Resource
        } else if self.belongs_to_rest_service(url) {
            SourceKind::RestService
        } else if url.starts_with("http://") || url.starts_with("https://") {
            SourceKind::Http
        } else if url.starts_with("jar:") || url.contains("!/") {
            SourceKind::Archive
        } else {
            SourceKind::File
        }
    }

    fn belongs_to_rest_service(&self, url: &str) -> bool {
        let base = match &self.rest_service_base {
            Some(base) => base,
            None => return false,
        };
        if url.starts_with(base.as_str()) {
            return true;
        }
        // A child inherits the REST classification of its parent chain
        let parents = self.parents.lock().unwrap();
        let mut current = url;
        let mut hops = 0;
        while let Some(parent) = parents.get(current) {
            if parent.starts_with(base.as_str()) {
                return true;
            }
            current = parent;
            hops += 1;
            if hops > 64 {
                break;
            }
        }
        false
    }

    /// Snapshot of all currently cached sources.
    pub fn sources(&self) -> Vec<Arc<dyn ConfigSource>> {
        self.entries.lock().unwrap().values().cloned().collect()
    }
}
