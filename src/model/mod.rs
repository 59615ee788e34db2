// Measurement data model
// Records, snapshots, and summary scoring shared by every pipeline stage

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Measurement domain a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Compute benchmarks
    Benchmark,

    /// Functional checks
    Test,

    /// Resource-usage profiles
    Profile,

    /// External-integration health checks
    Integration,

    /// Transport-layer checks
    Transport,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Benchmark,
        Category::Test,
        Category::Profile,
        Category::Integration,
        Category::Transport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Benchmark => "benchmark",
            Category::Test => "test",
            Category::Profile => "profile",
            Category::Integration => "integration",
            Category::Transport => "transport",
        }
    }

    /// Broadcast topic carrying per-record events for this domain
    pub fn topic(&self) -> &'static str {
        match self {
            Category::Benchmark => "benchmark:complete",
            Category::Test => "tests:complete",
            Category::Profile => "profile:complete",
            Category::Integration => "integration:complete",
            Category::Transport => "transport:complete",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "benchmark" => Ok(Category::Benchmark),
            "test" => Ok(Category::Test),
            "profile" => Ok(Category::Profile),
            "integration" => Ok(Category::Integration),
            "transport" => Ok(Category::Transport),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

/// Outcome of a single measurement, fixed at write time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Warning,
    Fail,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Warning => "warning",
            Status::Fail => "fail",
        }
    }

    /// Pass and warning both count toward success rates and scores
    pub fn is_passing(&self) -> bool {
        matches!(self, Status::Pass | Status::Warning)
    }

    /// Grade a lower-is-better value against its target.
    /// Up to 25% over target is a warning, anything beyond fails.
    pub fn grade(value: f64, target: f64) -> Self {
        if value <= target {
            Status::Pass
        } else if value <= target * 1.25 {
            Status::Warning
        } else {
            Status::Fail
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pass" => Ok(Status::Pass),
            "warning" => Ok(Status::Warning),
            "fail" => Ok(Status::Fail),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Scalar value for domain-specific extension fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// JSON has no NaN or infinity, so those floats are carried as text
    pub fn normalized(self) -> Self {
        match self {
            Scalar::Float(value) if !value.is_finite() => Scalar::Text(value.to_string()),
            other => other,
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Scalar {
    fn from(value: usize) -> Self {
        Scalar::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value).normalized()
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

/// One data point from one named probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub name: String,
    pub category: Category,
    pub value: f64,
    pub target: f64,
    pub status: Status,

    /// Epoch milliseconds
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Scalar>,
}

impl MeasurementRecord {
    /// Create a record stamped with the current time
    pub fn new(
        name: impl Into<String>,
        category: Category,
        value: f64,
        target: f64,
        status: Status,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            value,
            target,
            status,
            timestamp: now_millis(),
            extensions: BTreeMap::new(),
        }
    }

    /// Create a record whose status is graded from value against target
    pub fn graded(name: impl Into<String>, category: Category, value: f64, target: f64) -> Self {
        Self::new(name, category, value, target, Status::grade(value, target))
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

/// Pass/warning/fail tally and score for one domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSummary {
    pub total: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,

    /// 0-100, see [`performance_score`]
    pub score: u8,
}

impl DomainSummary {
    pub fn from_records(records: &[MeasurementRecord]) -> Self {
        let mut summary = DomainSummary::default();
        for record in records {
            summary.add(record.status);
        }
        summary.score = performance_score(summary.passed + summary.warnings, summary.total);
        summary
    }

    fn add(&mut self, status: Status) {
        self.total += 1;
        match status {
            Status::Pass => self.passed += 1,
            Status::Warning => self.warnings += 1,
            Status::Fail => self.failed += 1,
        }
    }
}

/// Totals across every domain of a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub score: u8,
    pub domains: BTreeMap<Category, DomainSummary>,
}

/// Merged, immutable result of one collection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the run that produced this snapshot finished (epoch millis)
    pub generated_at: i64,

    /// When this copy was handed out (epoch millis)
    pub served_at: i64,

    /// True when served from the result cache
    pub cached: bool,

    pub domains: BTreeMap<Category, Vec<MeasurementRecord>>,
    pub summary: Summary,
}

impl Snapshot {
    /// Build a fresh snapshot; domains without records are dropped
    pub fn from_domains(domains: BTreeMap<Category, Vec<MeasurementRecord>>, generated_at: i64) -> Self {
        let domains: BTreeMap<_, _> = domains
            .into_iter()
            .filter(|(_, records)| !records.is_empty())
            .collect();

        let mut summary = Summary::default();
        for (category, records) in &domains {
            let domain = DomainSummary::from_records(records);
            summary.total += domain.total;
            summary.passed += domain.passed;
            summary.warnings += domain.warnings;
            summary.failed += domain.failed;
            summary.domains.insert(*category, domain);
        }
        summary.score = performance_score(summary.passed + summary.warnings, summary.total);

        Self {
            generated_at,
            served_at: generated_at,
            cached: false,
            domains,
            summary,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.domains.values().flatten()
    }

    pub fn failed_in(&self, category: Category) -> usize {
        self.summary
            .domains
            .get(&category)
            .map(|domain| domain.failed)
            .unwrap_or(0)
    }
}

/// round(100 * passing / total), 0 when there is nothing to score
pub fn performance_score(passing: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let score = (100.0 * passing as f64 / total as f64).round();
    score.clamp(0.0, 100.0) as u8
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
