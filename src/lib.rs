//! Archive Configd: Configuration Distribution Engine for Archival Clusters
//!
//! This library loads configuration from a prioritized list of sources
//! (local files, HTTP servers, a configuration REST service, bundled
//! resources and dynamic in-process generators), merges them into one
//! sealed configuration, and keeps every node of an archival preservation
//! cluster converging on the same state through periodic jittered reloads
//! and best-effort change notices.
//!
//! # Main Features
//!
//! - Conditional fetching with per-transport validators (mtime, ETag)
//! - Remote failover copies so nodes restart while servers are down
//! - Key-acceptance predicates guarding expert and title-db content
//! - Atomic install of the merged configuration with change listeners
//! - A legacy AU configuration migration path into a dedicated store
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use archive_configd::common::CancelFlag;
//! use archive_configd::manager::{CurrentConfig, ReloadCoordinator, ReloadScheduler, RootSpec};
//! use archive_configd::source::SourceCache;
//!
//! #[tokio::main]
//! async fn main() -> archive_configd::Result<()> {
//!     let cache = Arc::new(SourceCache::new(reqwest::Client::new(), None, None));
//!     let current = Arc::new(CurrentConfig::new());
//!     let coordinator = Arc::new(ReloadCoordinator::new(
//!         cache,
//!         Arc::clone(&current),
//!         vec![RootSpec::required("/etc/lockss/config/lockss.txt")],
//!     ));
//!
//!     let scheduler = Arc::new(ReloadScheduler::new(coordinator));
//!     let cancel = CancelFlag::new();
//!     scheduler.run(cancel).await;
//!     Ok(())
//! }
//! ```

// Public modules
pub mod aucfg;
pub mod cluster;
pub mod common;
pub mod config;
pub mod failover;
pub mod manager;
pub mod source;
pub mod status;

// Re-export commonly used structures and functions for convenience
pub use common::{init_logger, CancelFlag, ConfigError, Result};
pub use config::{ConfigDiff, Configuration};
pub use manager::{CurrentConfig, ReloadCoordinator, ReloadScheduler, RootSpec};
pub use source::SourceCache;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
