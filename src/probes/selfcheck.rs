// Functional self-checks
// Exercises the console's own pipeline pieces and reports them as test results

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::broadcast::protocol::{parse_client_message, ClientMessage};
use crate::cache::ResultCache;
use crate::history::trends::percentile;
use crate::model::{performance_score, Category, MeasurementRecord, Snapshot, Status};
use crate::orchestrator::{MeasurementSource, SourceError};

/// Each check should finish well inside this budget
const CHECK_TARGET_MS: f64 = 5.0;

type Check = (&'static str, fn() -> bool);

const CHECKS: [Check; 4] = [
    ("selfcheck.cache_round_trip", cache_round_trip),
    ("selfcheck.percentile_nearest_rank", percentile_nearest_rank),
    ("selfcheck.protocol_ping", protocol_ping),
    ("selfcheck.score_rounding", score_rounding),
];

pub struct SelfCheckProbe {
    enabled: bool,
}

impl SelfCheckProbe {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl MeasurementSource for SelfCheckProbe {
    fn name(&self) -> &str {
        "self-checks"
    }

    fn category(&self) -> Category {
        Category::Test
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn measure(&self) -> Result<Vec<MeasurementRecord>, SourceError> {
        Ok(CHECKS
            .iter()
            .map(|(name, check)| {
                let started = Instant::now();
                let passed = check();
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                let status = if passed { Status::grade(elapsed_ms, CHECK_TARGET_MS) } else { Status::Fail };
                MeasurementRecord::new(*name, Category::Test, elapsed_ms, CHECK_TARGET_MS, status)
                    .with_extension("passed", passed)
            })
            .collect())
    }
}

fn cache_round_trip() -> bool {
    let cache = ResultCache::new(Duration::from_secs(60));
    let mut domains = BTreeMap::new();
    domains.insert(
        Category::Test,
        vec![MeasurementRecord::new("probe", Category::Test, 1.0, 1.0, Status::Pass)],
    );
    let snapshot = Snapshot::from_domains(domains, 0);
    cache.set(snapshot.clone());
    matches!(cache.get(), Some(hit) if hit.cached && hit.domains == snapshot.domains)
}

fn percentile_nearest_rank() -> bool {
    let values = [10.0, 20.0, 30.0, 40.0];
    percentile(&values, 50.0) == 20.0 && percentile(&values, 95.0) == 40.0 && percentile(&[], 95.0) == 0.0
}

fn protocol_ping() -> bool {
    matches!(parse_client_message(r#"{"type":"ping"}"#), Ok(ClientMessage::Ping))
}

fn score_rounding() -> bool {
    performance_score(2, 3) == 67 && performance_score(0, 0) == 0 && performance_score(5, 5) == 100
}
