// Application context
// Owns the shared pipeline components; everything else borrows them through Arc

use std::sync::Arc;
use tracing::error;

use crate::broadcast::BroadcastHub;
use crate::cache::ResultCache;
use crate::config::ConsoleConfig;
use crate::history::HistoryStore;
use crate::orchestrator::{MeasurementSource, Orchestrator};
use crate::probes;

pub struct AppContext {
    pub config: ConsoleConfig,
    pub cache: Arc<ResultCache>,
    pub history: Option<Arc<HistoryStore>>,
    pub hub: Arc<BroadcastHub>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppContext {
    /// Wire up the pipeline with the built-in probes
    pub fn build(config: ConsoleConfig) -> Self {
        let sources = probes::configured_sources(&config.probes);
        Self::with_sources(config, sources)
    }

    /// Wire up the pipeline with caller-provided sources.
    /// A store that fails to open leaves the console running without history.
    pub fn with_sources(config: ConsoleConfig, sources: Vec<Arc<dyn MeasurementSource>>) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache_ttl()));
        let hub = Arc::new(BroadcastHub::new(config.collection.viewer_queue_capacity));

        let history = match HistoryStore::open(&config.history.path, config.history.retention_days) {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                error!(
                    path = %config.history.path.display(),
                    error = %err,
                    "History store unavailable; running without persistence"
                );
                None
            }
        };

        let orchestrator = Arc::new(Orchestrator::new(
            sources,
            cache.clone(),
            history.clone(),
            hub.clone(),
            config.orchestrator(),
        ));

        Self {
            config,
            cache,
            history,
            hub,
            orchestrator,
        }
    }
}
