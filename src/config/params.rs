//! Well-known parameter names and defaults
//!
//! Centralized constants for the parameter names the engine itself consumes.
//! The semantics of other parameters are opaque to this crate.

use std::time::Duration;

// --- Reload loop ---

/// Reload interval in milliseconds.
pub const PARAM_RELOAD_INTERVAL: &str = "org.lockss.config.reloadInterval";
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_millis(600_000);
/// Floor applied to any configured reload interval.
pub const MIN_RELOAD_INTERVAL: Duration = Duration::from_secs(15);

// --- Reference keys scanned for further URLs ---

/// Auxiliary property file URLs, loaded with the referencing source's policy.
pub const PARAM_AUX_PROP_URLS: &str = "org.lockss.auxPropUrls";
/// User-supplied title database URLs (title namespace only).
pub const PARAM_USER_TITLE_DB_URLS: &str = "org.lockss.userTitleDbs";
/// Global title database URLs (title namespace only).
pub const PARAM_GLOBAL_TITLE_DB_URLS: &str = "org.lockss.titleDbs";

// --- Title namespace ---

pub const PREFIX_TITLE: &str = "org.lockss.title";
pub const PREFIX_TITLE_SET: &str = "org.lockss.titleSet";

// --- Platform configuration ---

pub const PARAM_PLATFORM_HOST: &str = "org.lockss.platform.fqdn";
pub const PARAM_PLATFORM_GROUP: &str = "org.lockss.platform.group";
pub const PARAM_PLATFORM_PROJECT: &str = "org.lockss.platform.project";
pub const PARAM_PLATFORM_VERSION: &str = "org.lockss.platform.version";
pub const PARAM_PLATFORM_DISK_PATHS: &str = "org.lockss.platform.diskSpacePaths";
pub const PARAM_PLATFORM_ACCESS_SUBNET: &str = "org.lockss.platform.accesssubnet";

/// Effective parameter names that receive platform-derived values during
/// post-processing.
pub const PARAM_DAEMON_GROUPS: &str = "org.lockss.daemon.groups";
pub const PARAM_CACHE_PATHS: &str = "org.lockss.cache.location";
pub const PARAM_UI_ACCESS_INCLUDE: &str = "org.lockss.ui.access.ip.include";
pub const PARAM_PROXY_ACCESS_INCLUDE: &str = "org.lockss.proxy.access.ip.include";

/// Prefix of the platform-version-scoped override block; keys under
/// `<prefix>.<version>.` are copied with the prefix stripped.
pub const PLATFORM_VERSION_OVERRIDE_PREFIX: &str = "org.lockss.platform.version";

// --- Expert config policy ---

pub const PARAM_EXPERT_ALLOW: &str = "org.lockss.config.expert.allow";
pub const PARAM_EXPERT_DENY: &str = "org.lockss.config.expert.deny";

// --- Remote failover ---

pub const PARAM_FAILOVER_CHECKSUM_ALGORITHM: &str =
    "org.lockss.config.remoteFailover.checksumAlgorithm";
pub const PARAM_FAILOVER_CHECKSUM_REQUIRED: &str =
    "org.lockss.config.remoteFailover.checksumRequired";
pub const PARAM_FAILOVER_MAX_AGE: &str = "org.lockss.config.remoteFailover.maxAge";

// --- Local cache files, in merge order ---

pub const CONFIG_FILE_UI_IP_ACCESS: &str = "ui_ip_access.txt";
pub const CONFIG_FILE_PROXY_IP_ACCESS: &str = "proxy_ip_access.txt";
pub const CONFIG_FILE_PLUGIN: &str = "plugin.txt";
pub const CONFIG_FILE_CONTENT_SERVERS: &str = "content_servers_config.txt";
pub const CONFIG_FILE_CRAWL_PROXY: &str = "crawl_proxy.txt";
pub const CONFIG_FILE_EXPERT_CLUSTER: &str = "expert_config.txt";
pub const CONFIG_FILE_EXPERT_LOCAL: &str = "expert_config_local.txt";

/// Legacy archival-unit configuration file migrated into the AU store.
pub const CONFIG_FILE_AU: &str = "au.txt";

/// Prefix of per-AU configuration subtrees.
pub const PREFIX_AU: &str = "org.lockss.au";

/// Legacy parameter aliases reconciled during post-processing: value of the
/// old name is copied to the new name when the new name is absent.
pub const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("org.lockss.config.reloadPeriod", PARAM_RELOAD_INTERVAL),
    ("org.lockss.platform.localIPAddress", PARAM_PLATFORM_HOST),
    ("org.lockss.titleDbPath", PARAM_GLOBAL_TITLE_DB_URLS),
];
