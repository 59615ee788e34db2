// History store
// Durable SQLite time series of every measurement, with retention and trend queries

mod migrations;
pub mod trends;

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::Context;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::model::{now_millis, Category, MeasurementRecord, Scalar, Status};
use migrations::run_migrations;
pub use trends::{Baseline, Regression, Sample, TrendBucket, TrendReport};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const HOUR_MS: i64 = 60 * 60 * 1000;
const MINUTE_MS: i64 = 60 * 1000;

/// Persistence failures; callers log these and degrade
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open history store: {0:#}")]
    Open(anyhow::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode extension field: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt history row: {0}")]
    Corrupt(String),

    #[error("history worker is not running")]
    WorkerGone,
}

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct WorkerHandle {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to history worker: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join history worker: {join_err:?}");
            }
        }
    }
}

/// Per-name aggregate read from the success-rate view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRate {
    pub name: String,
    pub category: Category,
    pub total: u64,
    pub passed: u64,
    pub success_rate: f64,
    pub avg_value: f64,
    pub last_seen: i64,
}

/// Append-only measurement history.
///
/// A single worker thread owns the connection, so the file has exactly one
/// writer; async callers hand it closures and await the reply.
#[derive(Clone)]
pub struct HistoryStore {
    inner: Arc<WorkerHandle>,
    path: Arc<PathBuf>,
    retention_days: u32,
}

impl HistoryStore {
    /// Open (or create) the store file and run migrations
    pub fn open(path: impl Into<PathBuf>, retention_days: u32) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create history directory {}", parent.display()))
                .map_err(StoreError::Open)?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();
        let path_for_thread = path.clone();

        let worker = thread::Builder::new()
            .name("probe-console-history".into())
            .spawn(move || {
                let mut conn = match open_connection(&path_for_thread) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    error!("History open receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }

                debug!("History worker shutting down");
            })
            .context("failed to spawn history worker thread")
            .map_err(StoreError::Open)?;

        ready_rx
            .recv()
            .context("history worker exited before signaling readiness")
            .and_then(|result| result)
            .map_err(StoreError::Open)?;

        info!(path = %path.display(), retention_days, "History store opened");

        Ok(Self {
            inner: Arc::new(WorkerHandle {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            path: Arc::new(path),
            retention_days,
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Run a closure against the connection on the worker thread
    pub(crate) async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                debug!("History caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|_| StoreError::WorkerGone)?;

        reply_rx.await.map_err(|_| StoreError::WorkerGone)?
    }

    /// Persist a batch in one transaction, then apply the retention policy.
    ///
    /// Records whose value or target is not finite cannot be stored and are
    /// skipped; the rest of the batch is still written.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn append_batch(&self, records: Vec<MeasurementRecord>) -> Result<usize, StoreError> {
        let (records, rejected): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| record.value.is_finite() && record.target.is_finite());
        for record in &rejected {
            warn!(
                name = %record.name,
                value = record.value,
                target = record.target,
                "Skipping measurement with non-finite value"
            );
        }
        if records.is_empty() {
            return Ok(0);
        }

        let retention_days = self.retention_days;
        let inserted = self
            .execute(move |conn| {
                let inserted = insert_records(conn, &records)?;
                let cutoff = retention_cutoff(retention_days, now_millis());
                match delete_before(conn, cutoff) {
                    Ok(0) => {}
                    Ok(pruned) => debug!(pruned, "Pruned expired measurements"),
                    Err(err) => warn!(error = %err, "Automatic prune failed"),
                }
                Ok(inserted)
            })
            .await?;

        debug!(inserted, "Measurement batch persisted");
        Ok(inserted)
    }

    /// Delete measurements older than `retention_days`; returns rows removed
    pub async fn prune(&self, retention_days: u32) -> usize {
        self.prune_at(retention_days, now_millis()).await
    }

    /// Prune relative to an explicit clock. Rows exactly at the cutoff survive.
    pub async fn prune_at(&self, retention_days: u32, now: i64) -> usize {
        let cutoff = retention_cutoff(retention_days, now);
        match self.execute(move |conn| delete_before(conn, cutoff)).await {
            Ok(pruned) => {
                info!(pruned, retention_days, "History pruned");
                pruned
            }
            Err(err) => {
                error!(error = %err, "History prune failed");
                0
            }
        }
    }

    /// Bucketed trends over the last `hours`, with baseline and regressions
    pub async fn query_trends(&self, hours: u32, bucket_minutes: u32) -> TrendReport {
        self.query_trends_at(hours, bucket_minutes, now_millis()).await
    }

    #[instrument(skip(self))]
    pub async fn query_trends_at(&self, hours: u32, bucket_minutes: u32, now: i64) -> TrendReport {
        let window_start = now - i64::from(hours) * HOUR_MS;
        let baseline_start = now - trends::BASELINE_WINDOW_MS;
        let width_ms = i64::from(bucket_minutes.max(1)) * MINUTE_MS;

        let loaded = self
            .execute(move |conn| {
                let window = load_samples(conn, window_start, None)?;
                let baseline = load_samples(conn, baseline_start, Some(window_start))?;
                Ok((window, baseline))
            })
            .await;

        match loaded {
            Ok((window, baseline)) => {
                let report = trends::analyze(&window, &baseline, width_ms);
                if !report.regressions.is_empty() {
                    warn!(count = report.regressions.len(), "Performance regressions detected");
                }
                report
            }
            Err(err) => {
                error!(error = %err, "Trend query failed");
                TrendReport::default()
            }
        }
    }

    /// Per-name success rates from the pre-aggregated view
    pub async fn success_rates(&self) -> Vec<SuccessRate> {
        let result = self
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, category, total, passed, success_rate, avg_value, last_seen
                     FROM measurement_success_rates
                     ORDER BY category, name",
                )?;
                let mut rows = stmt.query([])?;
                let mut rates = Vec::new();
                while let Some(row) = rows.next()? {
                    rates.push(SuccessRate {
                        name: row.get(0)?,
                        category: parse_category(&row.get::<_, String>(1)?)?,
                        total: to_u64(row.get(2)?)?,
                        passed: to_u64(row.get(3)?)?,
                        success_rate: row.get(4)?,
                        avg_value: row.get(5)?,
                        last_seen: row.get(6)?,
                    });
                }
                Ok(rates)
            })
            .await;

        result.unwrap_or_else(|err| {
            error!(error = %err, "Success-rate query failed");
            Vec::new()
        })
    }

    /// Most recent records for one name, newest first, extensions included
    pub async fn latest(&self, name: &str, limit: usize) -> Vec<MeasurementRecord> {
        let name = name.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let result = self
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, category, value, target, status, timestamp
                     FROM measurements
                     WHERE name = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?2",
                )?;
                let mut ext_stmt = conn.prepare(
                    "SELECT key, value_json FROM measurement_extensions WHERE measurement_id = ?1",
                )?;

                let mut rows = stmt.query(params![name, limit])?;
                let mut records = Vec::new();
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    let mut extensions = BTreeMap::new();
                    let mut ext_rows = ext_stmt.query(params![id])?;
                    while let Some(ext) = ext_rows.next()? {
                        let key: String = ext.get(0)?;
                        let raw: String = ext.get(1)?;
                        match serde_json::from_str::<Scalar>(&raw) {
                            Ok(value) => {
                                extensions.insert(key, value);
                            }
                            Err(err) => {
                                warn!(
                                    measurement_id = id,
                                    key = %key,
                                    error = %err,
                                    "Skipping undecodable extension field"
                                );
                            }
                        }
                    }

                    records.push(MeasurementRecord {
                        name: row.get(1)?,
                        category: parse_category(&row.get::<_, String>(2)?)?,
                        value: row.get(3)?,
                        target: row.get(4)?,
                        status: parse_status(&row.get::<_, String>(5)?)?,
                        timestamp: row.get(6)?,
                        extensions,
                    });
                }
                Ok(records)
            })
            .await;

        result.unwrap_or_else(|err| {
            error!(error = %err, "History lookup failed");
            Vec::new()
        })
    }

    /// Total stored measurements
    pub async fn record_count(&self) -> Result<u64, StoreError> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
            to_u64(count)
        })
        .await
    }
}

fn open_connection(path: &Path) -> anyhow::Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .context("failed to enable WAL mode")?;
    if !mode.eq_ignore_ascii_case("wal") {
        warn!(mode = %mode, "SQLite refused WAL journal mode");
    }
    // Survive process crashes, not power loss.
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to relax synchronous mode")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;

    run_migrations(&mut conn).context("failed to run history migrations")?;
    Ok(conn)
}

fn insert_records(conn: &mut Connection, records: &[MeasurementRecord]) -> Result<usize, StoreError> {
    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare_cached(
            "INSERT INTO measurements (name, category, value, target, status, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut insert_ext = tx.prepare_cached(
            "INSERT OR REPLACE INTO measurement_extensions (measurement_id, category, key, value_json)
             VALUES (?1, ?2, ?3, ?4)",
        )?;

        for record in records {
            insert.execute(params![
                record.name,
                record.category.as_str(),
                record.value,
                record.target,
                record.status.as_str(),
                record.timestamp,
            ])?;

            let id = tx.last_insert_rowid();
            for (key, value) in &record.extensions {
                insert_ext.execute(params![
                    id,
                    record.category.as_str(),
                    key,
                    serde_json::to_string(&value.clone().normalized())?,
                ])?;
            }
        }
    }
    tx.commit()?;
    Ok(records.len())
}

fn delete_before(conn: &mut Connection, cutoff: i64) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM measurements WHERE timestamp < ?1", params![cutoff])?)
}

fn load_samples(conn: &mut Connection, from: i64, until: Option<i64>) -> Result<Vec<Sample>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, value, status, timestamp
         FROM measurements
         WHERE timestamp >= ?1 AND (?2 IS NULL OR timestamp < ?2)
         ORDER BY timestamp ASC",
    )?;
    let mut rows = stmt.query(params![from, until])?;
    let mut samples = Vec::new();
    while let Some(row) = rows.next()? {
        samples.push(Sample {
            name: row.get(0)?,
            value: row.get(1)?,
            status: parse_status(&row.get::<_, String>(2)?)?,
            timestamp: row.get(3)?,
        });
    }
    Ok(samples)
}

fn retention_cutoff(retention_days: u32, now: i64) -> i64 {
    now - i64::from(retention_days) * DAY_MS
}

fn parse_category(value: &str) -> Result<Category, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

fn parse_status(value: &str) -> Result<Status, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative count {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, retention_days: u32) -> HistoryStore {
        HistoryStore::open(dir.path().join("history.db"), retention_days).unwrap()
    }

    fn record(name: &str, value: f64, status: Status, timestamp: i64) -> MeasurementRecord {
        MeasurementRecord::new(name, Category::Benchmark, value, 100.0, status).at(timestamp)
    }

    #[tokio::test]
    async fn test_append_and_count() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);
        let now = now_millis();

        let inserted = store
            .append_batch(vec![
                record("a", 1.0, Status::Pass, now),
                record("b", 2.0, Status::Fail, now),
            ])
            .await
            .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(store.record_count().await.unwrap(), 2);
        assert_eq!(store.append_batch(Vec::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_record_does_not_sink_batch() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);
        let now = now_millis();

        let inserted = store
            .append_batch(vec![
                record("good", 1.0, Status::Pass, now),
                record("nan", f64::NAN, Status::Fail, now),
                MeasurementRecord::new("inf", Category::Benchmark, 1.0, f64::INFINITY, Status::Pass).at(now),
            ])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.record_count().await.unwrap(), 1);
        assert_eq!(store.latest("good", 10).await.len(), 1);

        let only_bad = vec![record("nan", f64::NAN, Status::Fail, now)];
        assert_eq!(store.append_batch(only_bad).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_extension_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);
        let now = now_millis();

        let mut odd = record("x", 2.0, Status::Pass, now);
        odd.extensions.insert("ratio".to_string(), Scalar::Float(f64::NAN));
        store
            .append_batch(vec![record("x", 1.0, Status::Pass, now - 1), odd])
            .await
            .unwrap();

        let stored = store.latest("x", 10).await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].extensions["ratio"], Scalar::Text("NaN".to_string()));
    }

    #[tokio::test]
    async fn test_undecodable_extension_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);
        let now = now_millis();

        let tagged = record("x", 1.0, Status::Pass, now).with_extension("runs", 3usize);
        store.append_batch(vec![tagged]).await.unwrap();
        store
            .execute(|conn| {
                Ok(conn.execute(
                    "UPDATE measurement_extensions SET value_json = 'null' WHERE key = 'runs'",
                    [],
                )?)
            })
            .await
            .unwrap();

        let stored = store.latest("x", 10).await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].extensions.is_empty());
    }

    #[tokio::test]
    async fn test_prune_boundary_keeps_cutoff_row() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 365);
        let now = now_millis();
        let cutoff = now - 30 * DAY_MS;

        store
            .append_batch(vec![
                record("old", 1.0, Status::Pass, cutoff - 1),
                record("edge", 1.0, Status::Pass, cutoff),
                record("fresh", 1.0, Status::Pass, now),
            ])
            .await
            .unwrap();

        assert_eq!(store.prune_at(30, now).await, 1);
        assert!(store.latest("old", 10).await.is_empty());
        assert_eq!(store.latest("edge", 10).await.len(), 1);
        assert_eq!(store.latest("fresh", 10).await.len(), 1);

        // Idempotent
        assert_eq!(store.prune_at(30, now).await, 0);
    }

    #[tokio::test]
    async fn test_append_applies_retention() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);
        let now = now_millis();

        store
            .append_batch(vec![
                record("ancient", 1.0, Status::Pass, now - 40 * DAY_MS),
                record("current", 1.0, Status::Pass, now),
            ])
            .await
            .unwrap();

        assert_eq!(store.record_count().await.unwrap(), 1);
        assert!(store.latest("ancient", 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_extensions_survive_and_cascade() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 365);
        let now = now_millis();

        let tagged = record("sort", 12.0, Status::Pass, now - 60 * DAY_MS)
            .with_extension("iterations", 1000u64)
            .with_extension("stable", true);
        store.append_batch(vec![tagged]).await.unwrap();

        let loaded = store.latest("sort", 1).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].extensions.get("iterations"), Some(&Scalar::Int(1000)));
        assert_eq!(loaded[0].extensions.get("stable"), Some(&Scalar::Bool(true)));

        store.prune_at(30, now).await;
        let orphaned: i64 = store
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM measurement_extensions", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(orphaned, 0);
    }

    #[tokio::test]
    async fn test_query_trends_detects_regression() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);
        let now = now_millis();

        store
            .append_batch(vec![
                // Baseline: two days ago, outside the 1h window
                record("render", 90.0, Status::Pass, now - 2 * DAY_MS),
                record("render", 110.0, Status::Pass, now - 2 * DAY_MS + 1),
                // Current window
                record("render", 115.0, Status::Warning, now - 10 * MINUTE_MS),
                record("parse", 10.0, Status::Pass, now - 10 * MINUTE_MS),
            ])
            .await
            .unwrap();

        let report = store.query_trends_at(1, 60, now).await;
        assert_eq!(report.baseline.get("render").map(|b| b.avg), Some(100.0));
        assert!(report.baseline.get("parse").is_none());
        assert!(report.trends.iter().all(|bucket| bucket.count == 1));
        assert_eq!(report.regressions.len(), 1);
        assert_eq!(report.regressions[0].name, "render");
        assert!((report.regressions[0].change_percent - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_success_rate_view() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);
        let now = now_millis();

        store
            .append_batch(vec![
                record("a", 1.0, Status::Pass, now),
                record("a", 1.0, Status::Warning, now),
                record("a", 1.0, Status::Fail, now),
                record("a", 1.0, Status::Fail, now),
            ])
            .await
            .unwrap();

        let rates = store.success_rates().await;
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].total, 4);
        assert_eq!(rates[0].passed, 2);
        assert_eq!(rates[0].success_rate, 50.0);
    }

    #[tokio::test]
    async fn test_query_errors_degrade_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 30);
        store
            .execute(|conn| {
                conn.execute_batch("DROP VIEW measurement_success_rates; DROP TABLE measurement_extensions; DROP TABLE measurements;")?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(store.query_trends(24, 60).await.is_empty());
        assert!(store.success_rates().await.is_empty());
        assert_eq!(store.prune(30).await, 0);
        assert!(store.append_batch(vec![record("x", 1.0, Status::Pass, now_millis())]).await.is_err());
    }
}
