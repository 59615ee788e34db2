// Built-in measurement probes
// Concrete sources wired into the orchestrator from configuration

pub mod benchmark;
pub mod network;
pub mod resource;
pub mod selfcheck;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::ProbesConfig;
use crate::model::Category;
use crate::orchestrator::MeasurementSource;

/// Connect bound for endpoint probes; the per-source timeout still applies on top
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build one source per domain from configuration. Misconfigured domains
/// come back disabled rather than missing.
pub fn configured_sources(config: &ProbesConfig) -> Vec<Arc<dyn MeasurementSource>> {
    let sources: Vec<Arc<dyn MeasurementSource>> = vec![
        Arc::new(benchmark::BenchmarkProbe::new(config.benchmarks.clone())),
        Arc::new(selfcheck::SelfCheckProbe::new(config.self_checks.enabled)),
        Arc::new(resource::ProfileProbe::new(config.profile.clone())),
        Arc::new(network::EndpointProbe::from_config(
            "integrations",
            Category::Integration,
            &config.integrations,
            CONNECT_TIMEOUT,
        )),
        Arc::new(network::EndpointProbe::from_config(
            "transport",
            Category::Transport,
            &config.transport,
            CONNECT_TIMEOUT,
        )),
    ];

    let enabled = sources.iter().filter(|source| source.is_enabled()).count();
    info!(total = sources.len(), enabled, "Measurement sources configured");
    sources
}
