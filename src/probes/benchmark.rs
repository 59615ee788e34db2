// Compute benchmarks
// Timed sort, JSON, and hashing workloads run off the async executor

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use crate::config::BenchmarkProbeConfig;
use crate::model::{Category, MeasurementRecord};
use crate::orchestrator::{MeasurementSource, SourceError};

pub struct BenchmarkProbe {
    config: BenchmarkProbeConfig,
}

impl BenchmarkProbe {
    pub fn new(config: BenchmarkProbeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MeasurementSource for BenchmarkProbe {
    fn name(&self) -> &str {
        "benchmarks"
    }

    fn category(&self) -> Category {
        Category::Benchmark
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.workload_size > 0
    }

    async fn measure(&self) -> Result<Vec<MeasurementRecord>, SourceError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || run_workloads(&config))
            .await
            .map_err(|err| SourceError::Aborted(err.to_string()))?
    }
}

fn run_workloads(config: &BenchmarkProbeConfig) -> Result<Vec<MeasurementRecord>, SourceError> {
    let size = config.workload_size;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let data: Vec<u64> = (0..size).map(|_| rng.gen()).collect();

    let sort_ms = timed(|| {
        let mut copy = data.clone();
        copy.sort_unstable();
        copy.len()
    });

    let json_ms = timed_result(|| {
        let encoded = serde_json::to_vec(&data).map_err(|err| SourceError::probe("json.roundtrip", err))?;
        let decoded: Vec<u64> =
            serde_json::from_slice(&encoded).map_err(|err| SourceError::probe("json.roundtrip", err))?;
        Ok(decoded.len())
    })?;

    let hash_ms = timed(|| {
        let mut hasher = DefaultHasher::new();
        for value in &data {
            value.hash(&mut hasher);
        }
        hasher.finish() as usize
    });

    Ok(vec![
        record("sort.u64", sort_ms, config.sort_target_ms, size),
        record("json.roundtrip", json_ms, config.json_target_ms, size),
        record("hash.siphash", hash_ms, config.hash_target_ms, size),
    ])
}

fn record(name: &str, elapsed_ms: f64, target_ms: f64, elements: usize) -> MeasurementRecord {
    let ops_per_sec = if elapsed_ms > 0.0 {
        elements as f64 / (elapsed_ms / 1000.0)
    } else {
        elements as f64
    };
    MeasurementRecord::graded(name, Category::Benchmark, elapsed_ms, target_ms)
        .with_extension("elements", elements)
        .with_extension("ops_per_sec", ops_per_sec.round())
        .with_extension("unit", "ms")
}

fn timed<F: FnOnce() -> usize>(work: F) -> f64 {
    let started = Instant::now();
    std::hint::black_box(work());
    started.elapsed().as_secs_f64() * 1000.0
}

fn timed_result<F>(work: F) -> Result<f64, SourceError>
where
    F: FnOnce() -> Result<usize, SourceError>,
{
    let started = Instant::now();
    std::hint::black_box(work()?);
    Ok(started.elapsed().as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Scalar, Status};

    fn small_config() -> BenchmarkProbeConfig {
        BenchmarkProbeConfig {
            enabled: true,
            workload_size: 1_000,
            sort_target_ms: 10_000.0,
            json_target_ms: 10_000.0,
            hash_target_ms: 10_000.0,
        }
    }

    #[tokio::test]
    async fn test_benchmarks_produce_graded_records() {
        let records = BenchmarkProbe::new(small_config()).measure().await.unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.category, Category::Benchmark);
            assert_eq!(record.status, Status::Pass);
            assert!(record.value >= 0.0);
            assert_eq!(record.extensions.get("elements"), Some(&Scalar::Int(1_000)));
        }
    }

    #[test]
    fn test_disabled_when_configured_off() {
        let mut config = small_config();
        config.enabled = false;
        assert!(!BenchmarkProbe::new(config).is_enabled());

        let mut config = small_config();
        config.workload_size = 0;
        assert!(!BenchmarkProbe::new(config).is_enabled());
    }
}
