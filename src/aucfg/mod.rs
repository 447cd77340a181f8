//! Archival unit configuration store
//!
//! Per-AU configuration lives in a store keyed by AU identifier, separate
//! from the merged cluster configuration. Identifiers use the encoded form
//! (`|` for dots in the plugin name, `&`-separated `key~value` parameters)
//! so they never contain a literal dot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::{info, warn};

use crate::cluster::{ConfigNotice, ConfigPubSub};
use crate::common::{ConfigError, Result};
use crate::config::params::{CONFIG_FILE_AU, PREFIX_AU};
use crate::config::{parse, Configuration, ContentKind};

/// Storage seam for per-AU configuration.
#[async_trait]
pub trait AuConfigStore: Send + Sync {
    /// Store or replace one AU's configuration.
    async fn put_au_config(&self, au_id: &str, config: Configuration) -> Result<()>;

    async fn get_au_config(&self, au_id: &str) -> Result<Option<Arc<Configuration>>>;

    /// Remove an AU's configuration; returns whether it existed.
    async fn remove_au_config(&self, au_id: &str) -> Result<bool>;

    /// Identifiers of every stored AU belonging to `plugin_id`.
    async fn au_ids_for_plugin(&self, plugin_id: &str) -> Result<Vec<String>>;

    async fn au_ids(&self) -> Result<Vec<String>>;

    /// Release backend resources. Further calls may fail; the in-memory
    /// implementation treats this as a no-op.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory store, also the reference behavior for persistent backends.
/// Publishes an AU notice on every mutation when a pub/sub fabric is
/// attached.
pub struct MemoryAuConfigStore {
    entries: RwLock<HashMap<String, Arc<Configuration>>>,
    pubsub: Option<Arc<dyn ConfigPubSub>>,
}

impl MemoryAuConfigStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            pubsub: None,
        }
    }

    pub fn with_pubsub(mut self, pubsub: Arc<dyn ConfigPubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    fn publish(&self, notice: ConfigNotice) {
        if let Some(pubsub) = &self.pubsub {
            pubsub.publish(notice);
        }
    }
}

impl Default for MemoryAuConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuConfigStore for MemoryAuConfigStore {
    async fn put_au_config(&self, au_id: &str, mut config: Configuration) -> Result<()> {
        if au_id.is_empty() {
            return Err(ConfigError::Malformed("empty AU identifier".to_string()));
        }
        config.seal();
        self.entries
            .write()
            .unwrap()
            .insert(au_id.to_string(), Arc::new(config));
        self.publish(ConfigNotice::AuConfigStored {
            au_id: au_id.to_string(),
        });
        Ok(())
    }

    async fn get_au_config(&self, au_id: &str) -> Result<Option<Arc<Configuration>>> {
        Ok(self.entries.read().unwrap().get(au_id).cloned())
    }

    async fn remove_au_config(&self, au_id: &str) -> Result<bool> {
        let removed = self.entries.write().unwrap().remove(au_id).is_some();
        if removed {
            self.publish(ConfigNotice::AuConfigRemoved {
                au_id: au_id.to_string(),
            });
        }
        Ok(removed)
    }

    async fn au_ids_for_plugin(&self, plugin_id: &str) -> Result<Vec<String>> {
        let encoded = plugin_id.replace('.', "|");
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap()
            .keys()
            .filter(|id| plugin_of(id) == encoded)
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn au_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.entries.read().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Plugin component of an encoded AU identifier.
fn plugin_of(au_id: &str) -> &str {
    au_id.split('&').next().unwrap_or(au_id)
}

/// Migrate a legacy `au.txt` file into the store.
///
/// Keys of the form `org.lockss.au.<auid>.<param>` are grouped by AU
/// identifier and stored one configuration per AU; keys outside the AU
/// namespace are ignored with a warning. On success the file is renamed
/// with a `.migrated` suffix so the migration never runs twice. A missing
/// file is not an error. Returns the number of AUs migrated.
pub async fn migrate_legacy_file(dir: &Path, store: &dyn AuConfigStore) -> Result<usize> {
    let path = dir.join(CONFIG_FILE_AU);
    let content = match std::fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(ConfigError::Io(e)),
    };

    let flat = parse(ContentKind::Properties, &content)?;
    let au_prefix = format!("{}.", PREFIX_AU);

    let mut per_au: HashMap<String, Configuration> = HashMap::new();
    for (key, value) in flat.iter() {
        let rest = match key.strip_prefix(au_prefix.as_str()) {
            Some(rest) => rest,
            None => {
                warn!("ignoring non-AU key in {}: {}", path.display(), key);
                continue;
            }
        };
        // AU identifiers are dot-free by encoding, so the first dot
        // separates the identifier from the parameter name
        let (au_id, param) = match rest.split_once('.') {
            Some(split) => split,
            None => {
                warn!("ignoring malformed AU key in {}: {}", path.display(), key);
                continue;
            }
        };
        per_au
            .entry(au_id.to_string())
            .or_insert_with(Configuration::new)
            .put(param, value)?;
    }

    let migrated = per_au.len();
    for (au_id, config) in per_au {
        store.put_au_config(&au_id, config).await?;
    }

    let renamed = path.with_extension("txt.migrated");
    std::fs::rename(&path, &renamed).map_err(ConfigError::Io)?;
    info!(
        "migrated {} AU configurations from {} to the AU store",
        migrated,
        path.display()
    );
    Ok(migrated)
}
