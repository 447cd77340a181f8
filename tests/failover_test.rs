//! Failover substitution tests against a live-then-dead HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use archive_configd::common::CancelFlag;
use archive_configd::failover::{FailoverSettings, RemoteFailoverStore};
use archive_configd::manager::{CurrentConfig, PassOutcome, ReloadCoordinator, RootSpec};
use archive_configd::source::{ConfigSource, SourceCache};
use axum::routing::get;
use axum::Router;
use tempfile::TempDir;
use tokio::task::JoinHandle;

async fn serve(body: &'static str) -> (SocketAddr, JoinHandle<()>) {
    let app = Router::new().route("/lockss.txt", get(move || async move { body }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

fn coordinator_for(
    url: &str,
    failover: Arc<RemoteFailoverStore>,
) -> (ReloadCoordinator, Arc<SourceCache>) {
    let cache = Arc::new(SourceCache::new(
        reqwest::Client::new(),
        Some(Arc::clone(&failover)),
        None,
    ));
    let coordinator = ReloadCoordinator::new(
        Arc::clone(&cache),
        Arc::new(CurrentConfig::new()),
        vec![RootSpec::required(url)],
    )
    .with_failover(failover);
    (coordinator, cache)
}

#[tokio::test]
async fn test_failover_copy_substituted_when_server_gone() {
    let dir = TempDir::new().unwrap();
    let (addr, server) = serve("org.lockss.ui.port=8081\n").await;
    let url = format!("http://{}/lockss.txt", addr);
    let cancel = CancelFlag::new();

    // First pass against the live server records a failover copy
    {
        let failover = Arc::new(
            RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap(),
        );
        let (coordinator, _) = coordinator_for(&url, failover);
        let outcome = coordinator.run_pass(false, &cancel).await.unwrap();
        assert!(matches!(outcome, PassOutcome::Installed(_)));
    }

    server.abort();
    let _ = server.await;

    // A fresh node with the same failover directory comes up on the copy
    let failover =
        Arc::new(RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap());
    let (coordinator, cache) = coordinator_for(&url, failover);
    let outcome = coordinator.run_pass(true, &cancel).await.unwrap();
    assert!(matches!(outcome, PassOutcome::Installed(_)));
    assert_eq!(
        coordinator.current().get().get("org.lockss.ui.port"),
        Some("8081")
    );

    // The substituted content is flagged as served from failover
    let source = cache.find(&url).unwrap();
    assert!(source.core().state().from_failover);
}

#[tokio::test]
async fn test_error_status_substitutes_failover_copy() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let dir = TempDir::new().unwrap();
    let failing = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failing);
    let app = Router::new().route(
        "/lockss.txt",
        get(move || {
            let flag = Arc::clone(&flag);
            async move {
                if flag.load(Ordering::SeqCst) {
                    Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
                } else {
                    Ok("org.lockss.ui.port=8081\n")
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let url = format!("http://{}/lockss.txt", addr);
    let cancel = CancelFlag::new();

    let failover =
        Arc::new(RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap());
    let (coordinator, cache) = coordinator_for(&url, failover);
    coordinator.run_pass(false, &cancel).await.unwrap();

    // The server now answers every request with a 500; the verified copy
    // substitutes and the node keeps its configuration
    failing.store(true, Ordering::SeqCst);
    let outcome = coordinator.run_pass(true, &cancel).await.unwrap();
    assert!(matches!(outcome, PassOutcome::Unchanged));
    assert_eq!(
        coordinator.current().get().get("org.lockss.ui.port"),
        Some("8081")
    );
    let source = cache.find(&url).unwrap();
    assert!(source.core().state().from_failover);
}

#[tokio::test]
async fn test_unreachable_server_without_copy_fails() {
    let dir = TempDir::new().unwrap();
    let failover =
        Arc::new(RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap());
    let (coordinator, _) = coordinator_for("http://127.0.0.1:9/lockss.txt", failover);

    let err = coordinator
        .run_pass(false, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_corrupt_copy_is_not_substituted() {
    let dir = TempDir::new().unwrap();
    let (addr, server) = serve("k=v\n").await;
    let url = format!("http://{}/lockss.txt", addr);
    let cancel = CancelFlag::new();

    {
        let failover = Arc::new(
            RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap(),
        );
        let (coordinator, _) = coordinator_for(&url, failover);
        coordinator.run_pass(false, &cancel).await.unwrap();
    }

    server.abort();
    let _ = server.await;

    // Corrupt the stored copy; the checksum check must refuse it
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "gz") {
            std::fs::write(&path, b"garbage").unwrap();
        }
    }

    let failover =
        Arc::new(RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap());
    let (coordinator, _) = coordinator_for(&url, failover);
    let err = coordinator.run_pass(true, &cancel).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_stale_copy_is_not_substituted() {
    let dir = TempDir::new().unwrap();
    let (addr, server) = serve("k=v\n").await;
    let url = format!("http://{}/lockss.txt", addr);
    let cancel = CancelFlag::new();

    {
        let failover = Arc::new(
            RemoteFailoverStore::open(FailoverSettings::new(dir.path())).unwrap(),
        );
        let (coordinator, _) = coordinator_for(&url, failover);
        coordinator.run_pass(false, &cancel).await.unwrap();
    }

    server.abort();
    let _ = server.await;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let mut settings = FailoverSettings::new(dir.path());
    settings.max_age = Some(std::time::Duration::from_millis(1));
    let failover = Arc::new(RemoteFailoverStore::open(settings).unwrap());
    let (coordinator, _) = coordinator_for(&url, failover);
    let err = coordinator.run_pass(true, &cancel).await.unwrap_err();
    assert!(err.is_transient());
}
