//! Current configuration holder
//!
//! Process-scoped state carrying the single installed, sealed configuration.
//! Replaced by a single atomic pointer swap on every successful, changed
//! reload; readers never observe a half-updated configuration. A one-shot
//! "have we loaded at least once" gate lets other subsystems block during
//! startup.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use crate::common::{ConfigError, Result};
use crate::config::Configuration;

pub struct CurrentConfig {
    inner: RwLock<Arc<Configuration>>,
    ready_tx: watch::Sender<bool>,
}

impl Default for CurrentConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentConfig {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            // Initial value is an empty sealed configuration so no caller
            // ever observes a missing value
            inner: RwLock::new(Arc::new(Configuration::empty_sealed())),
            ready_tx,
        }
    }

    /// Current installed snapshot. Two consecutive reads may differ.
    pub fn get(&self) -> Arc<Configuration> {
        Arc::clone(&self.inner.read().unwrap())
    }

    /// Install a new sealed configuration, returning the one it replaced.
    pub fn install(&self, new: Arc<Configuration>) -> Arc<Configuration> {
        debug_assert!(new.is_sealed());
        let mut guard = self.inner.write().unwrap();
        std::mem::replace(&mut *guard, new)
    }

    /// True once at least one configuration has been installed.
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Release the startup gate. Idempotent.
    pub fn mark_ready(&self) {
        self.ready_tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
    }

    /// Block until the first configuration has been installed, with an
    /// optional deadline.
    pub async fn wait_ready(&self, timeout: Option<Duration>) -> Result<()> {
        let mut rx = self.ready_tx.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() {
                    return Ok(());
                }
                if rx.changed().await.is_err() {
                    return Err(ConfigError::Other(
                        "configuration holder dropped".to_string(),
                    ));
                }
            }
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| {
                    ConfigError::TransientIo("timed out waiting for first configuration".into())
                })?,
            None => wait.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_value_is_empty_sealed() {
        let current = CurrentConfig::new();
        let config = current.get();
        assert!(config.is_empty());
        assert!(config.is_sealed());
        assert!(!current.is_ready());
    }

    #[test]
    fn test_install_swaps() {
        let current = CurrentConfig::new();
        let mut new = Configuration::new();
        new.put("k", "v").unwrap();
        new.seal();

        let old = current.install(Arc::new(new));
        assert!(old.is_empty());
        assert_eq!(current.get().get("k"), Some("v"));
    }

    #[tokio::test]
    async fn test_wait_ready_blocks_until_marked() {
        let current = Arc::new(CurrentConfig::new());

        // Deadline expires while nothing is installed
        let err = current
            .wait_ready(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let waiter = Arc::clone(&current);
        let handle = tokio::spawn(async move { waiter.wait_ready(None).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        current.mark_ready();
        handle.await.unwrap().unwrap();
        assert!(current.is_ready());

        // Already-released gate returns immediately
        current.wait_ready(Some(Duration::from_millis(1))).await.unwrap();
    }
}
