//! Emergency status responder
//!
//! A minimal HTTP server started only while the node has never managed to
//! load a configuration, so operators can see why a node is not coming up.
//! It is shut down as soon as the first reload pass succeeds; the regular
//! service surfaces take over from there.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::common::{ConfigError, Result};
use crate::manager::ReloadCoordinator;

/// Snapshot of loading state reported by the responder.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    /// "waiting-for-config" until the first configuration is installed
    pub state: &'static str,
    pub last_error: Option<String>,
    pub last_attempt: Option<String>,
    pub loaded_urls: Vec<String>,
}

/// Handle to a running status responder.
pub struct StatusServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl StatusServer {
    /// Bind and start serving. The bound address is available immediately
    /// so tests can bind port 0.
    pub async fn start(addr: SocketAddr, coordinator: Arc<ReloadCoordinator>) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ConfigError::Io)?;
        let bound = listener.local_addr().map_err(ConfigError::Io)?;
        info!("emergency status responder listening on {}", bound);

        let app = build_router(coordinator);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                log::warn!("status responder error: {}", e);
            }
        });

        Ok(Self {
            addr: bound,
            shutdown_tx,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Graceful shutdown; waits for the serve task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
        info!("emergency status responder stopped");
    }
}

fn build_router(coordinator: Arc<ReloadCoordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(coordinator)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "OK"
}

async fn status(State(coordinator): State<Arc<ReloadCoordinator>>) -> Json<StatusBody> {
    Json(StatusBody {
        state: if coordinator.current().is_ready() {
            "running"
        } else {
            "waiting-for-config"
        },
        last_error: coordinator.last_error(),
        last_attempt: coordinator.last_attempt().map(|t| t.to_rfc3339()),
        loaded_urls: coordinator.spec_urls(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{CurrentConfig, RootSpec};
    use crate::source::SourceCache;

    fn coordinator() -> Arc<ReloadCoordinator> {
        let cache = Arc::new(SourceCache::new(reqwest::Client::new(), None, None));
        Arc::new(ReloadCoordinator::new(
            cache,
            Arc::new(CurrentConfig::new()),
            vec![RootSpec::required("/nonexistent/lockss.txt")],
        ))
    }

    #[tokio::test]
    async fn test_health_and_status_endpoints() {
        let server = StatusServer::start("127.0.0.1:0".parse().unwrap(), coordinator())
            .await
            .unwrap();
        let base = format!("http://{}", server.local_addr());
        let client = reqwest::Client::new();

        let health = client.get(format!("{}/health", base)).send().await.unwrap();
        assert!(health.status().is_success());
        assert_eq!(health.text().await.unwrap(), "OK");

        let status = client.get(format!("{}/status", base)).send().await.unwrap();
        assert!(status.status().is_success());
        let body: serde_json::Value = status.json().await.unwrap();
        assert_eq!(body["state"], "waiting-for-config");

        server.shutdown().await;
    }
}
