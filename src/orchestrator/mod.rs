// Collection Orchestrator
// Fans out to every measurement source, joins, merges, persists, caches, broadcasts

pub mod alerts;
pub mod scheduler;
pub mod source;

use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::broadcast::{protocol, BroadcastHub};
use crate::cache::ResultCache;
use crate::history::HistoryStore;
use crate::model::{now_millis, Category, MeasurementRecord, Snapshot};
pub use alerts::{Alert, AlertThresholds};
pub use source::{FnSource, MeasurementSource, SourceError};

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound for each individual source
    pub source_timeout: Duration,

    pub alerts: AlertThresholds,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(30),
            alerts: AlertThresholds::default(),
        }
    }
}

/// Outcome of one source within a run
struct SourceOutcome {
    name: String,
    category: Category,
    result: Result<Vec<MeasurementRecord>, SourceError>,
    elapsed: Duration,
}

/// Runs collection passes over the configured sources
pub struct Orchestrator {
    sources: Vec<Arc<dyn MeasurementSource>>,
    cache: Arc<ResultCache>,
    history: Option<Arc<HistoryStore>>,
    hub: Arc<BroadcastHub>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Arc<dyn MeasurementSource>>,
        cache: Arc<ResultCache>,
        history: Option<Arc<HistoryStore>>,
        hub: Arc<BroadcastHub>,
        config: OrchestratorConfig,
    ) -> Self {
        info!(
            sources = sources.len(),
            persistence = history.is_some(),
            "Initializing Collection Orchestrator"
        );

        Self {
            sources,
            cache,
            history,
            hub,
            config,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Produce a snapshot, from cache when allowed and warm, otherwise by
    /// running every source. Never fails: broken sources and storage only
    /// shrink or skip parts of the run.
    #[instrument(skip(self))]
    pub async fn collect(&self, use_cache: bool) -> Snapshot {
        if use_cache {
            if let Some(snapshot) = self.cache.get() {
                debug!(generated_at = snapshot.generated_at, "Serving cached snapshot");
                return snapshot;
            }
        }

        let started = Instant::now();
        let outcomes = self.run_sources().await;

        let mut domains: BTreeMap<Category, Vec<MeasurementRecord>> = BTreeMap::new();
        let mut failed_sources = 0usize;
        for outcome in outcomes {
            match outcome.result {
                Ok(records) => {
                    debug!(
                        source = %outcome.name,
                        category = %outcome.category,
                        records = records.len(),
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Source settled"
                    );
                    domains.entry(outcome.category).or_default().extend(records);
                }
                Err(err) => {
                    failed_sources += 1;
                    warn!(
                        source = %outcome.name,
                        category = %outcome.category,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        error = %err,
                        "Source failed; excluded from snapshot"
                    );
                }
            }
        }

        let snapshot = Snapshot::from_domains(domains, now_millis());

        self.persist(&snapshot).await;
        self.cache.set(snapshot.clone());
        self.publish(&snapshot);

        info!(
            total = snapshot.summary.total,
            score = snapshot.summary.score,
            failed_sources,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection run complete"
        );

        snapshot
    }

    /// Run every source concurrently and wait for all of them to settle
    async fn run_sources(&self) -> Vec<SourceOutcome> {
        let timeout = self.config.source_timeout;

        let tasks = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let name = source.name().to_string();
                let category = source.category();
                let started = Instant::now();

                let result = if !source.is_enabled() {
                    debug!(source = %name, "Source disabled");
                    Ok(Vec::new())
                } else {
                    // Own task per source: CPU-heavy probes run in parallel and
                    // a panicking probe only takes itself down.
                    let handle = tokio::spawn(async move {
                        match tokio::time::timeout(timeout, source.measure()).await {
                            Ok(result) => result,
                            Err(_) => Err(SourceError::Timeout(timeout)),
                        }
                    });
                    match handle.await {
                        Ok(result) => result,
                        Err(join_err) => Err(SourceError::Aborted(join_err.to_string())),
                    }
                };

                SourceOutcome {
                    name,
                    category,
                    result,
                    elapsed: started.elapsed(),
                }
            }
        });

        join_all(tasks).await
    }

    /// One batched write per domain; failures are logged, never propagated
    async fn persist(&self, snapshot: &Snapshot) {
        let Some(history) = &self.history else {
            debug!("No history store configured; skipping persistence");
            return;
        };

        for (category, records) in &snapshot.domains {
            if let Err(err) = history.append_batch(records.clone()).await {
                error!(category = %category, error = %err, "Failed to persist measurements");
            }
        }
    }

    fn publish(&self, snapshot: &Snapshot) {
        for record in snapshot.records() {
            match serde_json::to_value(record) {
                Ok(payload) => {
                    self.hub.emit(record.category.topic(), payload);
                }
                Err(err) => warn!(name = %record.name, error = %err, "Failed to encode record event"),
            }
        }

        match serde_json::to_value(snapshot) {
            Ok(payload) => {
                self.hub.emit(protocol::TOPIC_DATA_UPDATED, payload);
            }
            Err(err) => warn!(error = %err, "Failed to encode snapshot event"),
        }

        let alerts = alerts::evaluate(snapshot, &self.config.alerts);
        if !alerts.is_empty() {
            warn!(count = alerts.len(), "Snapshot crossed alert thresholds");
            self.hub.emit(protocol::TOPIC_ALERTS, json!({ "alerts": alerts }));
        }
    }
}
