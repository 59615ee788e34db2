// Snapshot alert evaluation
// Threshold checks whose results are broadcast on the `alerts` topic

use serde::{Deserialize, Serialize};

use crate::model::{Category, Snapshot};

/// Limits that trigger alerts when crossed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Alert when the overall score drops below this
    pub min_performance_score: u8,

    /// Failing functional checks tolerated before alerting; 0 alerts on any
    pub max_failed_tests: usize,

    /// Failing benchmarks tolerated before alerting; 0 alerts on any
    pub max_failed_benchmarks: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_performance_score: 80,
            max_failed_tests: 0,
            max_failed_benchmarks: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PerformanceScore,
    FailedTests,
    FailedBenchmarks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

/// Check a snapshot against the thresholds. An empty snapshot has nothing
/// to judge and never alerts.
pub fn evaluate(snapshot: &Snapshot, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();
    if snapshot.summary.total == 0 {
        return alerts;
    }

    let score = snapshot.summary.score;
    if score < thresholds.min_performance_score {
        alerts.push(Alert {
            kind: AlertKind::PerformanceScore,
            severity: if score < thresholds.min_performance_score / 2 {
                Severity::Critical
            } else {
                Severity::Warning
            },
            message: format!(
                "Performance score {score} is below {}",
                thresholds.min_performance_score
            ),
            value: f64::from(score),
            threshold: f64::from(thresholds.min_performance_score),
        });
    }

    let failed_tests = snapshot.failed_in(Category::Test);
    if failed_tests > thresholds.max_failed_tests {
        alerts.push(Alert {
            kind: AlertKind::FailedTests,
            severity: Severity::Critical,
            message: format!("{failed_tests} functional check(s) failing"),
            value: failed_tests as f64,
            threshold: thresholds.max_failed_tests as f64,
        });
    }

    let failed_benchmarks = snapshot.failed_in(Category::Benchmark);
    if failed_benchmarks > thresholds.max_failed_benchmarks {
        alerts.push(Alert {
            kind: AlertKind::FailedBenchmarks,
            severity: Severity::Warning,
            message: format!("{failed_benchmarks} benchmark(s) over target"),
            value: failed_benchmarks as f64,
            threshold: thresholds.max_failed_benchmarks as f64,
        });
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MeasurementRecord, Status};
    use std::collections::BTreeMap;

    fn snapshot(records: Vec<MeasurementRecord>) -> Snapshot {
        let mut domains: BTreeMap<Category, Vec<MeasurementRecord>> = BTreeMap::new();
        for record in records {
            domains.entry(record.category).or_default().push(record);
        }
        Snapshot::from_domains(domains, 0)
    }

    #[test]
    fn test_healthy_snapshot_has_no_alerts() {
        let snap = snapshot(vec![MeasurementRecord::new("a", Category::Benchmark, 1.0, 2.0, Status::Pass)]);
        assert!(evaluate(&snap, &AlertThresholds::default()).is_empty());
    }

    #[test]
    fn test_empty_snapshot_has_no_alerts() {
        assert!(evaluate(&snapshot(Vec::new()), &AlertThresholds::default()).is_empty());
    }

    #[test]
    fn test_failures_raise_alerts() {
        let snap = snapshot(vec![
            MeasurementRecord::new("login", Category::Test, 1.0, 1.0, Status::Fail),
            MeasurementRecord::new("sort", Category::Benchmark, 9.0, 2.0, Status::Fail),
            MeasurementRecord::new("hash", Category::Benchmark, 1.0, 2.0, Status::Pass),
        ]);

        let alerts = evaluate(&snap, &AlertThresholds::default());
        let kinds: Vec<AlertKind> = alerts.iter().map(|alert| alert.kind).collect();
        assert_eq!(
            kinds,
            vec![AlertKind::PerformanceScore, AlertKind::FailedTests, AlertKind::FailedBenchmarks]
        );
        assert_eq!(alerts[0].value, 33.0);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let snap = snapshot(vec![
            MeasurementRecord::new("login", Category::Test, 1.0, 1.0, Status::Fail),
            MeasurementRecord::new("a", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("b", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("c", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("d", Category::Test, 1.0, 1.0, Status::Pass),
        ]);
        let thresholds = AlertThresholds {
            min_performance_score: 80,
            max_failed_tests: 1,
            max_failed_benchmarks: 0,
        };
        assert!(evaluate(&snap, &thresholds).is_empty());
    }

    #[test]
    fn test_one_failure_past_tolerance_alerts() {
        let snap = snapshot(vec![
            MeasurementRecord::new("login", Category::Test, 1.0, 1.0, Status::Fail),
            MeasurementRecord::new("logout", Category::Test, 1.0, 1.0, Status::Fail),
            MeasurementRecord::new("a", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("b", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("c", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("d", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("e", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("f", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("g", Category::Test, 1.0, 1.0, Status::Pass),
            MeasurementRecord::new("h", Category::Test, 1.0, 1.0, Status::Pass),
        ]);
        let thresholds = AlertThresholds {
            min_performance_score: 80,
            max_failed_tests: 1,
            max_failed_benchmarks: 0,
        };

        let alerts = evaluate(&snap, &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::FailedTests);
        assert_eq!(alerts[0].value, 2.0);
        assert_eq!(alerts[0].threshold, 1.0);
    }
}
