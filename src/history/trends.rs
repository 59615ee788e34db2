// Trend analysis over persisted measurements
// Time bucketing, nearest-rank percentiles, rolling baseline, regression flags

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::Status;

/// Trailing window used for baselines
pub const BASELINE_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Relative increase over baseline that counts as a regression
pub const REGRESSION_THRESHOLD: f64 = 0.10;

/// One stored observation as the analyzer sees it
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub value: f64,
    pub status: Status,
    pub timestamp: i64,
}

/// Aggregate of same-name samples in one fixed-width window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    pub bucket_start: i64,
    pub name: String,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub count: usize,

    /// Percentage of pass + warning samples
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub avg: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub name: String,
    pub current: f64,
    pub baseline: f64,
    pub change_percent: f64,
}

/// Result of a trend query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub trends: Vec<TrendBucket>,
    pub baseline: BTreeMap<String, Baseline>,
    pub regressions: Vec<Regression>,
}

impl TrendReport {
    pub fn is_empty(&self) -> bool {
        self.trends.is_empty() && self.baseline.is_empty() && self.regressions.is_empty()
    }
}

/// Nearest-rank percentile of an ascending slice; 0 for an empty slice
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

fn sort_values(values: &mut [f64]) {
    values.sort_by(|a, b| a.total_cmp(b));
}

/// Start of the bucket containing `timestamp`
pub fn bucket_start(timestamp: i64, width_ms: i64) -> i64 {
    timestamp.div_euclid(width_ms) * width_ms
}

/// Group samples into (name, bucket) aggregates, ordered by bucket then name
pub fn build_buckets(samples: &[Sample], width_ms: i64) -> Vec<TrendBucket> {
    let width_ms = width_ms.max(1);
    let mut groups: BTreeMap<(i64, &str), Vec<&Sample>> = BTreeMap::new();
    for sample in samples {
        groups
            .entry((bucket_start(sample.timestamp, width_ms), sample.name.as_str()))
            .or_default()
            .push(sample);
    }

    groups
        .into_iter()
        .map(|((start, name), group)| {
            let mut values: Vec<f64> = group.iter().map(|s| s.value).collect();
            sort_values(&mut values);
            let count = values.len();
            let passing = group.iter().filter(|s| s.status.is_passing()).count();

            TrendBucket {
                bucket_start: start,
                name: name.to_string(),
                avg: values.iter().sum::<f64>() / count as f64,
                min: values[0],
                max: values[count - 1],
                p50: percentile(&values, 50.0),
                p95: percentile(&values, 95.0),
                count,
                pass_rate: passing as f64 / count as f64 * 100.0,
            }
        })
        .collect()
}

/// Per-name average and p95 over the supplied baseline samples
pub fn build_baseline(samples: &[Sample]) -> BTreeMap<String, Baseline> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        groups.entry(sample.name.as_str()).or_default().push(sample.value);
    }

    groups
        .into_iter()
        .map(|(name, mut values)| {
            sort_values(&mut values);
            let avg = values.iter().sum::<f64>() / values.len() as f64;
            (name.to_string(), Baseline { avg, p95: percentile(&values, 95.0) })
        })
        .collect()
}

/// Compare each name's most recent bucket average against its baseline
pub fn detect_regressions(
    buckets: &[TrendBucket],
    baseline: &BTreeMap<String, Baseline>,
) -> Vec<Regression> {
    let mut latest: BTreeMap<&str, &TrendBucket> = BTreeMap::new();
    for bucket in buckets {
        let slot = latest.entry(bucket.name.as_str()).or_insert(bucket);
        if bucket.bucket_start > slot.bucket_start {
            *slot = bucket;
        }
    }

    latest
        .into_iter()
        .filter_map(|(name, bucket)| {
            let base = baseline.get(name)?;
            if base.avg <= 0.0 {
                return None;
            }
            let change = (bucket.avg - base.avg) / base.avg;
            (change > REGRESSION_THRESHOLD).then(|| Regression {
                name: name.to_string(),
                current: bucket.avg,
                baseline: base.avg,
                change_percent: change * 100.0,
            })
        })
        .collect()
}

/// Full analysis of an analyzed window against its baseline window
pub fn analyze(window: &[Sample], baseline_samples: &[Sample], width_ms: i64) -> TrendReport {
    let trends = build_buckets(window, width_ms);
    let baseline = build_baseline(baseline_samples);
    let regressions = detect_regressions(&trends, &baseline);
    TrendReport { trends, baseline, regressions }
}
