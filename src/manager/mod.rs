//! Reload coordination
//!
//! The orchestrator of one reload pass: resolves the configured root URLs
//! plus any URLs referenced inside already-loaded configuration, builds an
//! ordered, de-duplicated list of generations, merges them into one logical
//! configuration, detects whether anything changed, and atomically installs
//! the result as the current configuration.

pub mod current;
pub mod generation;
pub mod scheduler;

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use metrics::counter;

use crate::cluster::{ConfigNotice, ConfigPubSub};
use crate::common::{CancelFlag, ConfigError, Result};
use crate::config::params;
use crate::config::{ConfigDiff, Configuration, KeyPredicate, PredicateFailurePolicy};
use crate::failover::RemoteFailoverStore;
use crate::source::{load, SourceCache};

pub use current::CurrentConfig;
pub use generation::Generation;
pub use scheduler::ReloadScheduler;

/// One configured root URL and its failure policy.
#[derive(Debug, Clone)]
pub struct RootSpec {
    pub url: String,
    /// A required root whose fetch fails aborts the whole pass
    pub required: bool,
}

impl RootSpec {
    pub fn required(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            required: true,
        }
    }

    pub fn optional(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            required: false,
        }
    }
}

/// Outcome of one reload pass.
#[derive(Debug)]
pub enum PassOutcome {
    /// A changed configuration was installed
    Installed(ConfigDiff),
    /// Nothing changed; the previous configuration remains current
    Unchanged,
}

/// Change listener invoked with (new, old, diff) after each install.
pub type ChangeListener =
    Box<dyn Fn(&Configuration, &Configuration, &ConfigDiff) + Send + Sync>;

/// Unit of work on the reference-resolution queue.
struct WorkItem {
    url: String,
    /// URL of the referencing source, for relative resolution
    base: Option<String>,
    required: bool,
    predicate: KeyPredicate,
}

pub struct ReloadCoordinator {
    cache: Arc<SourceCache>,
    failover: Option<Arc<RemoteFailoverStore>>,
    current: Arc<CurrentConfig>,
    roots: Vec<RootSpec>,
    /// Directory holding the node's local cache files
    local_dir: Option<PathBuf>,
    listeners: RwLock<Vec<ChangeListener>>,
    pubsub: Option<Arc<dyn ConfigPubSub>>,
    platform: RwLock<Arc<Configuration>>,
    /// URLs of the last pass, in load order
    spec_urls: RwLock<Vec<String>>,
    last_error: RwLock<Option<String>>,
    last_attempt: RwLock<Option<DateTime<Utc>>>,
    /// url -> generation counter remembered from the last pass
    last_generations: Mutex<HashMap<String, u64>>,
    /// Interval used until the configuration supplies one
    default_interval: Duration,
}

impl ReloadCoordinator {
    pub fn new(cache: Arc<SourceCache>, current: Arc<CurrentConfig>, roots: Vec<RootSpec>) -> Self {
        Self {
            cache,
            failover: None,
            current,
            roots,
            local_dir: None,
            listeners: RwLock::new(Vec::new()),
            pubsub: None,
            platform: RwLock::new(Arc::new(Configuration::empty_sealed())),
            spec_urls: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
            last_attempt: RwLock::new(None),
            last_generations: Mutex::new(HashMap::new()),
            default_interval: params::DEFAULT_RELOAD_INTERVAL,
        }
    }

    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    pub fn with_failover(mut self, failover: Arc<RemoteFailoverStore>) -> Self {
        self.failover = Some(failover);
        self
    }

    pub fn with_local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }

    pub fn with_pubsub(mut self, pubsub: Arc<dyn ConfigPubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn current(&self) -> &Arc<CurrentConfig> {
        &self.current
    }

    pub fn cache(&self) -> &Arc<SourceCache> {
        &self.cache
    }

    /// Platform configuration captured by the pre-pass of the first load.
    pub fn platform_config(&self) -> Arc<Configuration> {
        Arc::clone(&self.platform.read().unwrap())
    }

    /// URLs loaded by the last pass, in load order.
    pub fn spec_urls(&self) -> Vec<String> {
        self.spec_urls.read().unwrap().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        *self.last_attempt.read().unwrap()
    }

    /// Register a change listener; invocation order is registration order.
    pub fn add_listener(&self, listener: ChangeListener) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Reload interval from the installed configuration, clamped to the
    /// minimum; a config change retunes the loop on the next pass.
    pub fn reload_interval(&self) -> Duration {
        let configured = self
            .current
            .get()
            .get_duration_ms(params::PARAM_RELOAD_INTERVAL)
            .unwrap_or(self.default_interval);
        configured.max(params::MIN_RELOAD_INTERVAL)
    }

    /// Execute one reload pass.
    ///
    /// With `force`, every source's stored validator is forgotten first so
    /// each fetch is unconditional. A failure after the first successful
    /// load leaves the installed configuration authoritative.
    pub async fn run_pass(&self, force: bool, cancel: &CancelFlag) -> Result<PassOutcome> {
        *self.last_attempt.write().unwrap() = Some(Utc::now());
        counter!("configd_reload_passes_total").increment(1);

        let result = self.do_pass(force, cancel).await;

        // The failover store is persisted regardless of pass outcome
        if let Some(failover) = &self.failover {
            if let Err(e) = failover.flush() {
                warn!("failed to persist failover state: {}", e);
            }
        }

        match &result {
            Ok(_) => {
                *self.last_error.write().unwrap() = None;
            }
            Err(e) if e.is_interrupt() => {}
            Err(e) => {
                counter!("configd_reload_failures_total").increment(1);
                *self.last_error.write().unwrap() = Some(e.to_string());
            }
        }
        result
    }

    async fn do_pass(&self, force: bool, cancel: &CancelFlag) -> Result<PassOutcome> {
        cancel.check()?;

        if !self.current.is_ready() {
            self.platform_prepass(force, cancel).await?;
        }

        let generations = self.collect_generations(force, cancel).await?;

        let mut merged = generation::merge(&generations)?;
        self.post_process(&mut merged)?;
        merged.seal();

        *self.spec_urls.write().unwrap() =
            generations.iter().map(|g| g.url.clone()).collect();

        let previous = self.current.get();
        let counters_unchanged = self.current.is_ready() && self.same_counters(&generations);
        if counters_unchanged || merged.same_values(&previous) {
            // Remember counters anyway so later passes don't re-report
            // "possibly changed" spuriously
            self.remember_generations(&generations);
            if !self.current.is_ready() {
                // A successful first pass opens the gate even when the
                // merge equals the initial empty configuration
                self.current.mark_ready();
            }
            debug!("reload pass: no change");
            return Ok(PassOutcome::Unchanged);
        }

        let diff = merged.diff(&previous);
        info!("installing new configuration: {}", diff);
        counter!("configd_config_installs_total").increment(1);

        let new = Arc::new(merged);
        let old = self.current.install(Arc::clone(&new));
        self.remember_generations(&generations);
        self.notify_listeners(&new, &old, &diff);

        if let Some(pubsub) = &self.pubsub {
            pubsub.publish(ConfigNotice::GlobalConfigChanged);
        }

        if !self.current.is_ready() {
            self.current.mark_ready();
        }

        Ok(PassOutcome::Installed(diff))
    }

    /// Load only platform sources into a separate sealed configuration
    /// available to the rest of the pass.
    async fn platform_prepass(&self, force: bool, cancel: &CancelFlag) -> Result<()> {
        let mut platform = Configuration::new();
        let mut loaded_any = false;

        for root in &self.roots {
            cancel.check()?;
            let source = match self.cache.find(&root.url) {
                Ok(source) => source,
                Err(_) => continue,
            };
            if !source.is_platform_source() {
                continue;
            }
            if force {
                source.forget_validator();
            }
            match load(source.as_ref()).await {
                Ok(generation) => {
                    platform.copy_from(&generation.config)?;
                    loaded_any = true;
                }
                Err(e) if e.is_interrupt() => return Err(e),
                Err(e) => warn!("platform pre-pass: {} failed: {}", root.url, e),
            }
        }

        if loaded_any {
            platform.seal();
            *self.platform.write().unwrap() = Arc::new(platform);
        }
        Ok(())
    }

    /// Resolve roots and referenced URLs breadth-first, de-duplicated by
    /// resolved absolute URL, then append the node's local cache files.
    async fn collect_generations(
        &self,
        force: bool,
        cancel: &CancelFlag,
    ) -> Result<Vec<Generation>> {
        let mut generations: Vec<Generation> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<WorkItem> = self
            .roots
            .iter()
            .map(|root| WorkItem {
                url: root.url.clone(),
                base: None,
                required: root.required,
                predicate: KeyPredicate::accept_all(),
            })
            .collect();

        while let Some(item) = queue.pop_front() {
            cancel.check()?;

            let url = resolve_url(item.base.as_deref(), &item.url);
            if !seen.insert(url.clone()) {
                continue;
            }
            if let Some(base) = &item.base {
                self.cache.note_reference(base, &url);
            }

            let source = match self.cache.find(&url) {
                Ok(source) => source,
                Err(e) if item.required => return Err(e),
                Err(e) => {
                    warn!("skipping optional source {}: {}", url, e);
                    continue;
                }
            };
            source.core().set_key_predicate(item.predicate.clone());
            if force {
                source.forget_validator();
            }

            match load(source.as_ref()).await {
                Ok(generation) => {
                    self.enqueue_references(&generation, item.required, &mut queue);
                    generations.push(generation);
                }
                Err(e) if e.is_interrupt() => return Err(e),
                // A policy rejection is fatal to the pass regardless of
                // the source's required flag
                Err(e @ ConfigError::PolicyRejected(_)) => return Err(e),
                Err(e) if item.required => return Err(e),
                Err(e) => warn!("skipping optional source {}: {}", url, e),
            }
        }

        let loaded = generations.clone();
        self.append_local_files(&loaded, &mut generations, force, cancel)
            .await?;

        Ok(generations)
    }

    /// Scan one generation for the fixed set of reference keys and queue
    /// every URL found, with per-kind policy and predicate.
    fn enqueue_references(
        &self,
        generation: &Generation,
        parent_required: bool,
        queue: &mut VecDeque<WorkItem>,
    ) {
        let config = &generation.config;
        let base = Some(generation.url.clone());

        for url in config.get_list(params::PARAM_AUX_PROP_URLS) {
            queue.push_back(WorkItem {
                url,
                base: base.clone(),
                required: parent_required,
                predicate: KeyPredicate::accept_all(),
            });
        }

        let title_predicate = KeyPredicate::namespace(
            &[params::PREFIX_TITLE, params::PREFIX_TITLE_SET],
            PredicateFailurePolicy::RejectFile,
        );
        for key in [
            params::PARAM_USER_TITLE_DB_URLS,
            params::PARAM_GLOBAL_TITLE_DB_URLS,
        ] {
            for url in config.get_list(key) {
                queue.push_back(WorkItem {
                    url,
                    base: base.clone(),
                    required: false,
                    predicate: title_predicate.clone(),
                });
            }
        }
    }

    /// Append the node's local on-disk cache files as additional
    /// generations, each filtered by its own key predicate.
    async fn append_local_files(
        &self,
        loaded: &[Generation],
        generations: &mut Vec<Generation>,
        force: bool,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let dir = match &self.local_dir {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };

        let expert = self.expert_predicate(loaded)?;
        let plain = KeyPredicate::accept_all();
        let files: [(&str, &KeyPredicate); 7] = [
            (params::CONFIG_FILE_UI_IP_ACCESS, &plain),
            (params::CONFIG_FILE_PROXY_IP_ACCESS, &plain),
            (params::CONFIG_FILE_PLUGIN, &plain),
            (params::CONFIG_FILE_CONTENT_SERVERS, &plain),
            (params::CONFIG_FILE_CRAWL_PROXY, &plain),
            (params::CONFIG_FILE_EXPERT_CLUSTER, &expert),
            (params::CONFIG_FILE_EXPERT_LOCAL, &expert),
        ];

        for (name, predicate) in files {
            cancel.check()?;
            let path = dir.join(name);
            if !path.exists() {
                continue;
            }
            let url = path.to_string_lossy().into_owned();
            let source = self.cache.find(&url)?;
            source.core().set_key_predicate((*predicate).clone());
            if force {
                source.forget_validator();
            }
            match load(source.as_ref()).await {
                Ok(generation) => generations.push(generation),
                Err(e) if e.is_interrupt() => return Err(e),
                Err(e @ ConfigError::PolicyRejected(_)) => return Err(e),
                Err(e) => warn!("skipping local cache file {}: {}", url, e),
            }
        }
        Ok(())
    }

    /// Build the expert-config allow/deny predicate from the configuration
    /// collected so far, falling back to the installed configuration.
    fn expert_predicate(&self, loaded: &[Generation]) -> Result<KeyPredicate> {
        let interim = generation::merge(loaded)?;
        let installed = self.current.get();
        let lookup = |key: &str| -> Vec<String> {
            if interim.contains_key(key) {
                interim.get_list(key)
            } else {
                installed.get_list(key)
            }
        };
        Ok(KeyPredicate::allow_deny(
            &lookup(params::PARAM_EXPERT_ALLOW),
            &lookup(params::PARAM_EXPERT_DENY),
        ))
    }

    /// Structural post-processing rules applied before sealing.
    fn post_process(&self, config: &mut Configuration) -> Result<()> {
        // Platform-derived values copied to their effective parameter names
        if let Some(group) = config.get(params::PARAM_PLATFORM_GROUP).map(str::to_string) {
            if !config.contains_key(params::PARAM_DAEMON_GROUPS) {
                config.put(params::PARAM_DAEMON_GROUPS, group)?;
            }
        }
        if let Some(paths) = config
            .get(params::PARAM_PLATFORM_DISK_PATHS)
            .map(str::to_string)
        {
            if !config.contains_key(params::PARAM_CACHE_PATHS) {
                config.put(params::PARAM_CACHE_PATHS, paths)?;
            }
        }

        // Platform-version-scoped override block
        if let Some(version) = config.get(params::PARAM_PLATFORM_VERSION).map(str::to_string) {
            let prefix = format!(
                "{}.{}.",
                params::PLATFORM_VERSION_OVERRIDE_PREFIX,
                version
            );
            let overrides: Vec<(String, String)> = config
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(prefix.as_str())
                        .map(|stripped| (stripped.to_string(), v.to_string()))
                })
                .collect();
            for (key, value) in overrides {
                config.put(key, value)?;
            }
        }

        // Legacy parameter aliases
        for (old, new) in params::LEGACY_ALIASES {
            if let Some(value) = config.get(old).map(str::to_string) {
                if !config.contains_key(new) {
                    config.put(*new, value)?;
                }
            }
        }

        // Node access subnet appended to IP allow-lists if not reflected
        if let Some(subnet) = config
            .get(params::PARAM_PLATFORM_ACCESS_SUBNET)
            .map(str::to_string)
        {
            for list_param in [
                params::PARAM_UI_ACCESS_INCLUDE,
                params::PARAM_PROXY_ACCESS_INCLUDE,
            ] {
                let mut list = config.get_list(list_param);
                if !list.iter().any(|entry| entry == &subnet) {
                    list.push(subnet.clone());
                    config.put(list_param, list.join(";"))?;
                }
            }
        }

        Ok(())
    }

    /// True when the pass saw exactly the same source set with the same
    /// generation counters as the last pass, so the merged result cannot
    /// differ from what is already installed.
    fn same_counters(&self, generations: &[Generation]) -> bool {
        let remembered = self.last_generations.lock().unwrap();
        remembered.len() == generations.len()
            && generations
                .iter()
                .all(|g| remembered.get(&g.url) == Some(&g.generation))
    }

    fn remember_generations(&self, generations: &[Generation]) {
        let mut remembered = self.last_generations.lock().unwrap();
        remembered.clear();
        for generation in generations {
            remembered.insert(generation.url.clone(), generation.generation);
        }
    }

    /// Invoke listeners in registration order; a listener failure is
    /// logged, never allowed to abort or roll back the install.
    fn notify_listeners(&self, new: &Configuration, old: &Configuration, diff: &ConfigDiff) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(new, old, diff))) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("configuration change listener panicked: {}", msg);
            }
        }
    }
}

/// Resolve a possibly-relative reference URL against the URL of the source
/// that referenced it.
pub fn resolve_url(base: Option<&str>, url: &str) -> String {
    let has_scheme = url.contains("://")
        || url.starts_with("dyn:")
        || url.starts_with("resource:")
        || url.starts_with("jar:")
        || url.starts_with("file:");
    if has_scheme || url.starts_with('/') {
        return url.to_string();
    }

    match base {
        Some(base) if base.contains("://") => match base.rfind('/') {
            // Keep everything through the last slash of the base URL
            Some(idx) if idx > base.find("://").map(|i| i + 2).unwrap_or(0) => {
                format!("{}/{}", &base[..idx], url)
            }
            _ => format!("{}/{}", base.trim_end_matches('/'), url),
        },
        Some(base) => {
            let parent = Path::new(base).parent().unwrap_or_else(|| Path::new(""));
            parent.join(url).to_string_lossy().into_owned()
        }
        None => url.to_string(),
    }
}
