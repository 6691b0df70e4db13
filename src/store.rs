//! Metric store for hostwatch
//!
//! Provides the key-ordered time-series store abstraction the monitoring
//! core runs against: point-batch inserts, ascending range queries, and
//! retention-based pruning. Two backends are included: an in-memory store
//! and an append-only JSON-lines store organized as one file per day.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{MetricCategory, MetricPoint, TrendReport};
use crate::scheduler::JobExecutionRecord;

/// Time-series persistence for metric points.
///
/// Inserts within one sampling cycle are a single atomic batch: concurrent
/// readers observe either none or all of the cycle's points. Queries return
/// points in ascending timestamp order. Deletion is idempotent.
pub trait MetricStore: Send + Sync {
    fn insert(&self, points: &[MetricPoint]) -> StoreResult<()>;

    fn query(
        &self,
        category: MetricCategory,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricPoint>>;

    /// Remove points strictly older than the cutoff; returns rows removed
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// Append-only history of job executions
pub trait ExecutionLog: Send + Sync {
    fn record(&self, record: JobExecutionRecord) -> StoreResult<()>;

    /// Most recent executions, newest first, optionally filtered by job id
    fn recent(&self, job_id: Option<&str>, limit: usize) -> StoreResult<Vec<JobExecutionRecord>>;

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// Persistence for derived analysis reports
pub trait ReportStore: Send + Sync {
    fn save_report(&self, report: TrendReport) -> StoreResult<()>;

    /// Most recent reports, newest first
    fn reports(&self, limit: usize) -> StoreResult<Vec<TrendReport>>;
}

type PointKey = (MetricCategory, String, DateTime<Utc>, u64);

#[derive(Default)]
struct MemoryInner {
    points: BTreeMap<PointKey, f64>,
    seq: u64,
    executions: Vec<JobExecutionRecord>,
    reports: Vec<TrendReport>,
}

/// In-memory store backed by a key-ordered map. The default backend and
/// the one the test suite runs against.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MetricStore for MemoryStore {
    fn insert(&self, points: &[MetricPoint]) -> StoreResult<()> {
        let mut inner = self.write();
        for point in points {
            let seq = inner.seq;
            inner.seq += 1;
            inner
                .points
                .insert((point.category, point.name.clone(), point.timestamp, seq), point.value);
        }
        Ok(())
    }

    fn query(
        &self,
        category: MetricCategory,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricPoint>> {
        let inner = self.read();
        let lo: PointKey = (category, metric.to_string(), start, 0);
        let hi: PointKey = (category, metric.to_string(), end, u64::MAX);
        Ok(inner
            .points
            .range(lo..=hi)
            .map(|((cat, name, ts, _), value)| MetricPoint::new(*ts, *cat, name.clone(), *value))
            .collect())
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.write();
        let before = inner.points.len();
        inner.points.retain(|(_, _, ts, _), _| *ts >= cutoff);
        Ok(before - inner.points.len())
    }
}

impl ExecutionLog for MemoryStore {
    fn record(&self, record: JobExecutionRecord) -> StoreResult<()> {
        self.write().executions.push(record);
        Ok(())
    }

    fn recent(&self, job_id: Option<&str>, limit: usize) -> StoreResult<Vec<JobExecutionRecord>> {
        let inner = self.read();
        Ok(inner
            .executions
            .iter()
            .rev()
            .filter(|r| job_id.map_or(true, |id| r.job_id == id))
            .take(limit)
            .cloned()
            .collect())
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.write();
        let before = inner.executions.len();
        inner.executions.retain(|r| r.finished_at >= cutoff);
        Ok(before - inner.executions.len())
    }
}

impl ReportStore for MemoryStore {
    fn save_report(&self, report: TrendReport) -> StoreResult<()> {
        self.write().reports.push(report);
        Ok(())
    }

    fn reports(&self, limit: usize) -> StoreResult<Vec<TrendReport>> {
        let inner = self.read();
        Ok(inner.reports.iter().rev().take(limit).cloned().collect())
    }
}

/// Append-only JSON-lines store: one `metrics/YYYY-MM-DD.jsonl` file per
/// day plus `executions.jsonl` and `reports.jsonl`. A single mutex guards
/// all file operations so a cycle's batch is never partially visible.
pub struct JsonlStore {
    base_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> StoreResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        for dir in [base_path.clone(), base_path.join("metrics")] {
            fs::create_dir_all(&dir).map_err(|_| StoreError::DirectoryCreationFailed {
                path: dir.to_string_lossy().to_string(),
            })?;
        }
        Ok(Self { base_path, lock: Mutex::new(()) })
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.base_path.join("metrics").join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn executions_file(&self) -> PathBuf {
        self.base_path.join("executions.jsonl")
    }

    fn reports_file(&self) -> PathBuf {
        self.base_path.join("reports.jsonl")
    }

    fn append_lines<T: serde::Serialize>(path: &Path, items: &[T]) -> StoreResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::WriteFailed { reason: e.to_string() })?;
        let mut writer = BufWriter::new(file);
        for item in items {
            serde_json::to_writer(&mut writer, item)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file =
            File::open(path).map_err(|e| StoreError::ReadFailed { reason: e.to_string() })?;
        let mut items = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| StoreError::ReadFailed { reason: e.to_string() })?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping corrupt store line: {}", e)
                }
            }
        }
        Ok(items)
    }

    fn rewrite_lines<T: serde::Serialize>(path: &Path, items: &[T]) -> StoreResult<()> {
        if items.is_empty() {
            if path.exists() {
                fs::remove_file(path)?;
            }
            return Ok(());
        }
        let file =
            File::create(path).map_err(|e| StoreError::WriteFailed { reason: e.to_string() })?;
        let mut writer = BufWriter::new(file);
        for item in items {
            serde_json::to_writer(&mut writer, item)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    fn metric_dates(&self) -> StoreResult<Vec<NaiveDate>> {
        let dir = self.base_path.join("metrics");
        let mut dates = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".jsonl") {
                if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                    dates.push(date);
                }
            }
        }
        dates.sort();
        Ok(dates)
    }
}

impl MetricStore for JsonlStore {
    fn insert(&self, points: &[MetricPoint]) -> StoreResult<()> {
        let _guard = self.guard();
        let mut by_date: BTreeMap<NaiveDate, Vec<&MetricPoint>> = BTreeMap::new();
        for point in points {
            by_date.entry(point.timestamp.date_naive()).or_default().push(point);
        }
        for (date, day_points) in by_date {
            Self::append_lines(&self.day_file(date), &day_points)?;
        }
        Ok(())
    }

    fn query(
        &self,
        category: MetricCategory,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricPoint>> {
        let _guard = self.guard();
        let mut results: Vec<MetricPoint> = Vec::new();
        for date in self.metric_dates()? {
            if date < start.date_naive() || date > end.date_naive() {
                continue;
            }
            let points: Vec<MetricPoint> = Self::read_lines(&self.day_file(date))?;
            results.extend(points.into_iter().filter(|p| {
                p.category == category
                    && p.name == metric
                    && p.timestamp >= start
                    && p.timestamp <= end
            }));
        }
        results.sort_by_key(|p| p.timestamp);
        Ok(results)
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.guard();
        let cutoff_date = cutoff.date_naive();
        let mut removed = 0;
        for date in self.metric_dates()? {
            if date > cutoff_date {
                continue;
            }
            let path = self.day_file(date);
            if date < cutoff_date {
                let points: Vec<MetricPoint> = Self::read_lines(&path)?;
                removed += points.len();
                fs::remove_file(&path)?;
            } else {
                // boundary day: drop only the lines before the cutoff
                let points: Vec<MetricPoint> = Self::read_lines(&path)?;
                let kept: Vec<MetricPoint> =
                    points.iter().filter(|p| p.timestamp >= cutoff).cloned().collect();
                removed += points.len() - kept.len();
                Self::rewrite_lines(&path, &kept)?;
            }
        }
        Ok(removed)
    }
}

impl ExecutionLog for JsonlStore {
    fn record(&self, record: JobExecutionRecord) -> StoreResult<()> {
        let _guard = self.guard();
        Self::append_lines(&self.executions_file(), std::slice::from_ref(&record))
    }

    fn recent(&self, job_id: Option<&str>, limit: usize) -> StoreResult<Vec<JobExecutionRecord>> {
        let _guard = self.guard();
        let records: Vec<JobExecutionRecord> = Self::read_lines(&self.executions_file())?;
        Ok(records
            .into_iter()
            .rev()
            .filter(|r| job_id.map_or(true, |id| r.job_id == id))
            .take(limit)
            .collect())
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.guard();
        let records: Vec<JobExecutionRecord> = Self::read_lines(&self.executions_file())?;
        let kept: Vec<JobExecutionRecord> =
            records.iter().filter(|r| r.finished_at >= cutoff).cloned().collect();
        let removed = records.len() - kept.len();
        Self::rewrite_lines(&self.executions_file(), &kept)?;
        Ok(removed)
    }
}

impl ReportStore for JsonlStore {
    fn save_report(&self, report: TrendReport) -> StoreResult<()> {
        let _guard = self.guard();
        Self::append_lines(&self.reports_file(), std::slice::from_ref(&report))
    }

    fn reports(&self, limit: usize) -> StoreResult<Vec<TrendReport>> {
        let _guard = self.guard();
        let reports: Vec<TrendReport> = Self::read_lines(&self.reports_file())?;
        Ok(reports.into_iter().rev().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobExecutionRecord, JobOutcome};
    use chrono::Duration as ChronoDuration;

    fn point(offset_days: i64, category: MetricCategory, name: &str, value: f64) -> MetricPoint {
        MetricPoint::new(Utc::now() - ChronoDuration::days(offset_days), category, name, value)
    }

    #[test]
    fn test_memory_store_query_ordering() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert(&[
                MetricPoint::new(now, MetricCategory::Cpu, "usage", 30.0),
                MetricPoint::new(now - ChronoDuration::hours(2), MetricCategory::Cpu, "usage", 10.0),
                MetricPoint::new(now - ChronoDuration::hours(1), MetricCategory::Cpu, "usage", 20.0),
                MetricPoint::new(now, MetricCategory::Memory, "usage", 99.0),
            ])
            .unwrap();

        let results = store
            .query(MetricCategory::Cpu, "usage", now - ChronoDuration::days(1), now)
            .unwrap();
        let values: Vec<f64> = results.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_memory_store_retention_cleanup() {
        let store = MemoryStore::new();
        store
            .insert(&[
                point(40, MetricCategory::Cpu, "usage", 1.0),
                point(1, MetricCategory::Cpu, "usage", 2.0),
            ])
            .unwrap();

        let cutoff = Utc::now() - ChronoDuration::days(30);
        assert_eq!(MetricStore::delete_older_than(&store, cutoff).unwrap(), 1);

        let remaining = store
            .query(MetricCategory::Cpu, "usage", Utc::now() - ChronoDuration::days(60), Utc::now())
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, 2.0);

        // idempotent: a second pass with the same cutoff deletes nothing
        assert_eq!(MetricStore::delete_older_than(&store, cutoff).unwrap(), 0);
    }

    #[test]
    fn test_memory_execution_log() {
        let store = MemoryStore::new();
        for i in 0..3 {
            let mut record = JobExecutionRecord::started("collect_metrics", Utc::now());
            record.outcome = if i == 1 {
                JobOutcome::Failed("probe offline".to_string())
            } else {
                JobOutcome::Success
            };
            store.record(record).unwrap();
        }
        store.record(JobExecutionRecord::started("cleanup_old_data", Utc::now())).unwrap();

        let all = store.recent(None, 10).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].job_id, "cleanup_old_data");

        let collects = store.recent(Some("collect_metrics"), 10).unwrap();
        assert_eq!(collects.len(), 3);
    }

    #[test]
    fn test_jsonl_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path()).unwrap();
        let now = Utc::now();

        store
            .insert(&[
                MetricPoint::new(now - ChronoDuration::hours(1), MetricCategory::Cpu, "usage", 10.0),
                MetricPoint::new(now, MetricCategory::Cpu, "usage", 20.0),
                MetricPoint::new(now, MetricCategory::Disk, "usage", 55.0),
            ])
            .unwrap();

        let results = store
            .query(MetricCategory::Cpu, "usage", now - ChronoDuration::days(1), now)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].timestamp <= results[1].timestamp);
        assert_eq!(results[1].value, 20.0);
    }

    #[test]
    fn test_jsonl_store_prunes_day_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path()).unwrap();

        store
            .insert(&[
                point(40, MetricCategory::Memory, "usage", 70.0),
                point(1, MetricCategory::Memory, "usage", 75.0),
            ])
            .unwrap();

        let cutoff = Utc::now() - ChronoDuration::days(30);
        assert_eq!(MetricStore::delete_older_than(&store, cutoff).unwrap(), 1);
        assert_eq!(MetricStore::delete_older_than(&store, cutoff).unwrap(), 0);

        let remaining = store
            .query(MetricCategory::Memory, "usage", Utc::now() - ChronoDuration::days(60), Utc::now())
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, 75.0);
    }

    #[test]
    fn test_jsonl_execution_log_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path()).unwrap();

        store.record(JobExecutionRecord::started("analyze_performance", Utc::now())).unwrap();
        let recent = store.recent(Some("analyze_performance"), 5).unwrap();
        assert_eq!(recent.len(), 1);

        let report = crate::metrics::TrendReport {
            category: MetricCategory::Cpu,
            metric: "usage".to_string(),
            period_start: Utc::now() - ChronoDuration::hours(24),
            period_end: Utc::now(),
            mean: 40.0,
            min: 10.0,
            max: 80.0,
            current: 50.0,
            samples: 12,
            direction: crate::metrics::TrendDirection::Stable,
            slope: 0.01,
            forecast: None,
        };
        store.save_report(report).unwrap();
        assert_eq!(store.reports(5).unwrap().len(), 1);
    }
}
