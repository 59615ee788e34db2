// Endpoint reachability probes
// TCP connect latency for transport checks and integration health

use async_trait::async_trait;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::warn;

use crate::config::{EndpointConfig, EndpointProbeConfig};
use crate::model::{Category, MeasurementRecord, Status};
use crate::orchestrator::{MeasurementSource, SourceError};

#[derive(Debug, Clone)]
struct Endpoint {
    name: String,
    address: String,
    target_ms: f64,
}

/// Connects to each configured endpoint and records the latency
pub struct EndpointProbe {
    name: String,
    category: Category,
    endpoints: Vec<Endpoint>,
    connect_timeout: Duration,
    enabled: bool,
}

impl EndpointProbe {
    /// Build from configuration. Any invalid endpoint disables the whole
    /// domain instead of failing startup.
    pub fn from_config(
        name: &str,
        category: Category,
        config: &EndpointProbeConfig,
        connect_timeout: Duration,
    ) -> Self {
        let endpoints = match validate(&config.endpoints) {
            Ok(endpoints) => endpoints,
            Err(err) => {
                warn!(source = name, error = %err, "Endpoint probe disabled");
                Vec::new()
            }
        };

        Self {
            name: name.to_string(),
            category,
            enabled: config.is_enabled() && !endpoints.is_empty(),
            endpoints,
            connect_timeout,
        }
    }

    async fn probe(&self, endpoint: &Endpoint) -> MeasurementRecord {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&endpoint.address)).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let record = match outcome {
            Ok(Ok(_stream)) => {
                MeasurementRecord::graded(&endpoint.name, self.category, elapsed_ms, endpoint.target_ms)
            }
            Ok(Err(err)) => MeasurementRecord::new(&endpoint.name, self.category, elapsed_ms, endpoint.target_ms, Status::Fail)
                .with_extension("error", err.to_string()),
            Err(_) => MeasurementRecord::new(&endpoint.name, self.category, elapsed_ms, endpoint.target_ms, Status::Fail)
                .with_extension("error", "connect timed out"),
        };

        record
            .with_extension("address", endpoint.address.as_str())
            .with_extension("unit", "ms")
    }
}

fn validate(configs: &[EndpointConfig]) -> Result<Vec<Endpoint>, SourceError> {
    configs
        .iter()
        .map(|config| {
            let (host, port) = config
                .address
                .rsplit_once(':')
                .ok_or_else(|| SourceError::Misconfigured(format!("'{}' is not host:port", config.address)))?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(SourceError::Misconfigured(format!(
                    "'{}' has an invalid host or port",
                    config.address
                )));
            }
            if config.target_ms <= 0.0 {
                return Err(SourceError::Misconfigured(format!(
                    "endpoint '{}' needs a positive target",
                    config.name
                )));
            }
            Ok(Endpoint {
                name: config.name.clone(),
                address: config.address.clone(),
                target_ms: config.target_ms,
            })
        })
        .collect()
}

#[async_trait]
impl MeasurementSource for EndpointProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn measure(&self) -> Result<Vec<MeasurementRecord>, SourceError> {
        Ok(join_all(self.endpoints.iter().map(|endpoint| self.probe(endpoint))).await)
    }
}
