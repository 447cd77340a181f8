//! Archive Configd Command Line Tool
//!
//! This binary runs the configuration distribution daemon for one node.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use archive_configd::aucfg::{self, AuConfigStore, MemoryAuConfigStore};
use archive_configd::cluster::{spawn_notice_handler, ConfigNotice, LocalPubSub};
use archive_configd::common::{init_logger, CancelFlag, Result};
use archive_configd::failover::{FailoverSettings, RemoteFailoverStore};
use archive_configd::manager::{
    CurrentConfig, PassOutcome, ReloadCoordinator, ReloadScheduler, RootSpec,
};
use archive_configd::source::SourceCache;
use archive_configd::{APP_NAME, VERSION};

/// Configuration distribution daemon for archival preservation clusters
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Configuration root URL or path; repeatable or `;`-separated,
    /// merged in order
    #[clap(short, long = "url", required = true, value_delimiter = ';')]
    urls: Vec<String>,

    /// Treat root URLs after the first as optional
    #[clap(long)]
    optional_aux: bool,

    /// Directory holding local cache files and failover copies
    #[clap(long, default_value = "/var/lockss/config")]
    cache_dir: PathBuf,

    /// Base URL of the configuration REST service, if this node uses one
    #[clap(long)]
    rest_service: Option<String>,

    /// Disable on-disk failover copies of remote sources
    #[clap(long)]
    no_failover: bool,

    /// Reload interval in milliseconds, until the configuration supplies one
    #[clap(long, default_value_t = 600_000)]
    reload_interval: u64,

    /// Listen address for the emergency status responder
    #[clap(long)]
    status_listen: Option<SocketAddr>,

    /// Keep the status responder running even after the first load succeeds
    #[clap(long, requires = "status_listen")]
    status_always: bool,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Run a single reload pass and exit
    #[clap(long)]
    one_shot: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args.log_level);
    info!("{} v{} starting", APP_NAME, VERSION);

    if let Err(e) = run(args).await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let failover = if args.no_failover {
        None
    } else {
        let settings = FailoverSettings::new(args.cache_dir.join("failover"));
        Some(Arc::new(RemoteFailoverStore::open(settings)?))
    };

    let cache = Arc::new(SourceCache::new(
        reqwest::Client::new(),
        failover.clone(),
        args.rest_service.clone(),
    ));
    let current = Arc::new(CurrentConfig::new());
    let pubsub = Arc::new(LocalPubSub::default());

    let roots: Vec<RootSpec> = args
        .urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            if args.optional_aux && i > 0 {
                RootSpec::optional(url.clone())
            } else {
                RootSpec::required(url.clone())
            }
        })
        .collect();

    let mut coordinator = ReloadCoordinator::new(cache, Arc::clone(&current), roots)
        .with_local_dir(&args.cache_dir)
        .with_default_interval(std::time::Duration::from_millis(args.reload_interval))
        .with_pubsub(pubsub.clone());
    if let Some(failover) = &failover {
        coordinator = coordinator.with_failover(Arc::clone(failover));
    }
    let coordinator = Arc::new(coordinator);

    let au_store = Arc::new(MemoryAuConfigStore::new().with_pubsub(pubsub.clone()));
    let migrated = aucfg::migrate_legacy_file(&args.cache_dir, au_store.as_ref()).await?;
    if migrated > 0 {
        info!("migrated {} legacy AU configurations", migrated);
    }

    let cancel = CancelFlag::new();

    if args.one_shot {
        match coordinator.run_pass(true, &cancel).await? {
            PassOutcome::Installed(diff) => info!("configuration installed: {}", diff),
            PassOutcome::Unchanged => info!("configuration unchanged"),
        }
        return Ok(());
    }

    // Always-on status serving is handled here; the scheduler only manages
    // the emergency lifecycle variant
    let mut permanent_status = None;
    let mut scheduler = ReloadScheduler::new(Arc::clone(&coordinator));
    match (args.status_listen, args.status_always) {
        (Some(listen), true) => {
            permanent_status =
                Some(archive_configd::status::StatusServer::start(listen, Arc::clone(&coordinator)).await?);
        }
        (Some(listen), false) => {
            scheduler = scheduler.with_status_responder(listen);
        }
        _ => {}
    }
    let scheduler = Arc::new(scheduler);

    let _notice_handler = spawn_notice_handler(
        pubsub,
        Arc::clone(&scheduler),
        |notice: &ConfigNotice| info!("AU configuration notice: {:?}", notice),
    );

    let ctrlc_cancel = cancel.clone();
    let ctrlc_scheduler = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            ctrlc_cancel.cancel();
            ctrlc_scheduler.shutdown();
        }
    });

    Arc::clone(&scheduler).run(cancel).await;

    if let Some(server) = permanent_status {
        server.shutdown().await;
    }
    au_store.close().await?;
    Ok(())
}
