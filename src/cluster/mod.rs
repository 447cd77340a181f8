//! Cluster configuration notices
//!
//! Best-effort pub/sub fabric carrying configuration change notices between
//! the nodes of a cluster. Delivery is at-most-once from the consumer's
//! point of view; every notice only accelerates a state change the periodic
//! reload would reach anyway.

use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A configuration change notice exchanged between cluster members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConfigNotice {
    /// The cluster-wide configuration changed; receivers should reload
    GlobalConfigChanged,
    /// An archival unit's configuration was stored or updated
    AuConfigStored { au_id: String },
    /// An archival unit's configuration was removed
    AuConfigRemoved { au_id: String },
}

/// Transport seam for configuration notices.
///
/// `publish` is fire-and-forget: a transport failure is logged by the
/// implementation and never surfaces to the reload machinery.
pub trait ConfigPubSub: Send + Sync {
    fn publish(&self, notice: ConfigNotice);
    fn subscribe(&self) -> broadcast::Receiver<ConfigNotice>;
}

/// In-process notice fabric backed by a broadcast channel.
///
/// Serves single-node deployments and tests; a networked transport plugs in
/// behind the same trait.
pub struct LocalPubSub {
    tx: broadcast::Sender<ConfigNotice>,
}

impl LocalPubSub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for LocalPubSub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ConfigPubSub for LocalPubSub {
    fn publish(&self, notice: ConfigNotice) {
        debug!("publishing notice: {:?}", notice);
        // No receivers is not an error
        let _ = self.tx.send(notice);
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigNotice> {
        self.tx.subscribe()
    }
}

/// Spawn the inbound notice handler: a global change forces an immediate
/// reload, AU notices are handed to the given callback.
pub fn spawn_notice_handler(
    pubsub: Arc<dyn ConfigPubSub>,
    scheduler: Arc<crate::manager::ReloadScheduler>,
    on_au_notice: impl Fn(&ConfigNotice) + Send + Sync + 'static,
) -> tokio::task::JoinHandle<()> {
    let mut rx = pubsub.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ConfigNotice::GlobalConfigChanged) => {
                    debug!("received global config change notice, forcing reload");
                    scheduler.force_reload();
                }
                Ok(notice) => on_au_notice(&notice),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Dropped notices are harmless; the periodic reload
                    // catches up
                    warn!("notice handler lagged, {} notices dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
