//! Reload scheduling
//!
//! Periodic reload loop with jittered sleeps, out-of-band force-reload
//! requests, a watchdog poke around each pass, and the emergency status
//! responder lifecycle for nodes that cannot complete their first load.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::Notify;

use crate::common::CancelFlag;
use crate::status::StatusServer;

use super::ReloadCoordinator;

/// Fraction of the reload interval used as jitter in each direction.
const JITTER_FRACTION: f64 = 0.25;

/// Watchdog poke callback, invoked before and after every pass.
pub type WatchdogPoke = Box<dyn Fn() + Send + Sync>;

pub struct ReloadScheduler {
    coordinator: Arc<ReloadCoordinator>,
    /// Wakes the sleep phase when a force request arrives
    force: Notify,
    /// Delay requested by the most recent force, consumed by the loop
    force_slot: Mutex<Option<Duration>>,
    /// True while a pass is executing
    running: AtomicBool,
    /// Set when a force arrives mid-pass; grants exactly one extra pass
    go_again: AtomicBool,
    stop: AtomicBool,
    stop_notify: Notify,
    watchdog: Mutex<Option<WatchdogPoke>>,
    /// Where the emergency status responder listens, if enabled
    status_listen: Option<SocketAddr>,
    status_server: tokio::sync::Mutex<Option<StatusServer>>,
}

impl ReloadScheduler {
    pub fn new(coordinator: Arc<ReloadCoordinator>) -> Self {
        Self {
            coordinator,
            force: Notify::new(),
            force_slot: Mutex::new(None),
            running: AtomicBool::new(false),
            go_again: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
            watchdog: Mutex::new(None),
            status_listen: None,
            status_server: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_status_responder(mut self, listen: SocketAddr) -> Self {
        self.status_listen = Some(listen);
        self
    }

    pub fn set_watchdog(&self, poke: WatchdogPoke) {
        *self.watchdog.lock().unwrap() = Some(poke);
    }

    pub fn coordinator(&self) -> &Arc<ReloadCoordinator> {
        &self.coordinator
    }

    /// Request an immediate reload. If a pass is already running, exactly
    /// one more pass runs right after it finishes.
    pub fn force_reload(&self) {
        self.force_reload_in(Duration::ZERO);
    }

    /// Request a reload after `delay`. A later request supersedes an
    /// earlier undelivered one.
    pub fn force_reload_in(&self, delay: Duration) {
        *self.force_slot.lock().unwrap() = Some(delay);
        if self.running.load(Ordering::SeqCst) {
            self.go_again.store(true, Ordering::SeqCst);
        }
        self.force.notify_one();
    }

    /// Ask the loop to exit after the current pass, if any.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_one();
    }

    /// Run the reload loop until shutdown or cancellation.
    ///
    /// Each iteration pokes the watchdog, runs one pass (forced if a force
    /// request is pending), pokes the watchdog again, then sleeps a
    /// jittered interval unless a force granted another immediate pass.
    pub async fn run(self: Arc<Self>, cancel: CancelFlag) {
        info!("reload scheduler started");
        loop {
            if self.stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                break;
            }

            self.poke_watchdog();
            let forced = self.force_slot.lock().unwrap().take().is_some();
            self.running.store(true, Ordering::SeqCst);
            let result = self.coordinator.run_pass(forced, &cancel).await;
            self.running.store(false, Ordering::SeqCst);
            self.poke_watchdog();

            match result {
                Ok(outcome) => {
                    debug!("reload pass finished: {:?}", outcome);
                    self.stop_status_responder().await;
                }
                Err(e) if e.is_interrupt() => {
                    info!("reload pass interrupted, scheduler exiting");
                    break;
                }
                Err(e) => {
                    warn!("reload pass failed: {}", e);
                    if !self.coordinator.current().is_ready() {
                        self.start_status_responder().await;
                    }
                }
            }

            // A force that arrived mid-pass grants exactly one extra pass
            if self.go_again.swap(false, Ordering::SeqCst) {
                continue;
            }

            if !self.sleep_phase(&cancel).await {
                break;
            }
        }
        self.stop_status_responder().await;
        info!("reload scheduler stopped");
    }

    /// Sleep until the next pass is due. Returns false if the loop should
    /// exit instead of running another pass.
    async fn sleep_phase(&self, cancel: &CancelFlag) -> bool {
        loop {
            if self.stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                return false;
            }
            let delay = match self.force_slot.lock().unwrap().as_ref() {
                // The slot stays set so the pass itself runs forced
                Some(delay) => *delay,
                None => jitter(self.coordinator.reload_interval()),
            };
            debug!("next reload pass in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => return true,
                // Recompute the delay from the freshly set force slot
                _ = self.force.notified() => continue,
                _ = self.stop_notify.notified() => return false,
            }
        }
    }

    fn poke_watchdog(&self) {
        if let Some(poke) = self.watchdog.lock().unwrap().as_ref() {
            poke();
        }
    }

    async fn start_status_responder(&self) {
        let listen = match self.status_listen {
            Some(listen) => listen,
            None => return,
        };
        let mut slot = self.status_server.lock().await;
        if slot.is_some() {
            return;
        }
        match StatusServer::start(listen, Arc::clone(&self.coordinator)).await {
            Ok(server) => *slot = Some(server),
            Err(e) => error!("failed to start status responder on {}: {}", listen, e),
        }
    }

    async fn stop_status_responder(&self) {
        if let Some(server) = self.status_server.lock().await.take() {
            server.shutdown().await;
        }
    }
}

/// Apply +/-25% uniform jitter so a cluster's nodes don't reload in phase.
fn jitter(interval: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0 - JITTER_FRACTION..1.0 + JITTER_FRACTION);
    interval.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        let interval = Duration::from_secs(600);
        for _ in 0..100 {
            let jittered = jitter(interval);
            assert!(jittered >= Duration::from_secs(450));
            assert!(jittered <= Duration::from_secs(750));
        }
    }
}
