// Periodic collection loop
// Re-runs the orchestrator on a fixed interval until stopped

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{info, warn, Instrument};

use super::Orchestrator;
use crate::observability::collection_span;

/// Drives `collect(false)` every `interval`
pub struct CollectionScheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    running: Arc<AtomicBool>,
    runs: Arc<AtomicU64>,
    stop: Arc<Notify>,
}

impl CollectionScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Spawn the loop; the first run starts immediately
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Collection scheduler already running");
            return;
        }

        info!(interval_secs = self.interval.as_secs_f64(), "Starting collection scheduler");

        let orchestrator = self.orchestrator.clone();
        let interval = self.interval;
        let running = self.running.clone();
        let runs = self.runs.clone();
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.notified() => break,
                }
                orchestrator
                    .collect(false)
                    .instrument(collection_span(false))
                    .await;
                runs.fetch_add(1, Ordering::Relaxed);
            }

            info!("Collection scheduler stopped");
        });
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping collection scheduler");
            self.stop.notify_one();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Completed runs since start
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }
}
