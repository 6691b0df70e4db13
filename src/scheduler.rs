//! Recurring-job scheduler for hostwatch
//!
//! Runs named jobs on independent cadences with per-job concurrency caps,
//! misfire coalescing, and an execution record for every tick. One job's
//! failure (including a panic inside its callback) never stops the
//! scheduler loop or sibling jobs; shutdown gives in-flight runs a bounded
//! grace period and abandons anything still running after it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{JobError, ScheduleError, ScheduleResult};
use crate::store::ExecutionLog;

/// When a job fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval, anchored at scheduler start
    Every(Duration),
    /// Once a day at a fixed local time (scheduler timezone)
    DailyAt { hour: u32, minute: u32 },
}

impl Schedule {
    fn first_fire(&self, now: DateTime<Utc>, tz: FixedOffset) -> DateTime<Utc> {
        match self {
            Schedule::Every(interval) => now + to_chrono(*interval),
            Schedule::DailyAt { hour, minute } => next_daily(now, *hour, *minute, tz),
        }
    }

    /// Advance a fire time past `now`, merging any missed intervals into
    /// the single tick that just fired (coalescing).
    fn advance_past(
        &self,
        fired: DateTime<Utc>,
        now: DateTime<Utc>,
        tz: FixedOffset,
    ) -> DateTime<Utc> {
        match self {
            Schedule::Every(interval) => {
                let step = to_chrono(*interval);
                let mut next = fired + step;
                while next <= now {
                    next += step;
                }
                next
            }
            Schedule::DailyAt { hour, minute } => next_daily(now.max(fired), *hour, *minute, tz),
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(1))
}

/// Next occurrence of `hour:minute` in the given fixed-offset timezone,
/// strictly after `after`.
fn next_daily(after: DateTime<Utc>, hour: u32, minute: u32, tz: FixedOffset) -> DateTime<Utc> {
    let local = after.with_timezone(&tz);
    let fire_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let mut candidate = local.date_naive().and_time(fire_time);
    let today = tz.from_local_datetime(&candidate).single();
    if today.map_or(true, |dt| dt <= local) {
        candidate = (local.date_naive() + chrono::Duration::days(1)).and_time(fire_time);
    }
    tz.from_local_datetime(&candidate)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| after + chrono::Duration::days(1))
}

/// Static description of a recurring job
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub id: String,
    pub schedule: Schedule,
    /// Concurrently executing instances allowed; ticks beyond the cap are
    /// recorded as skipped, never queued
    pub max_instances: usize,
    /// Maximum lateness within which a run still executes instead of skipping
    pub misfire_grace: Duration,
}

impl JobDescriptor {
    pub fn new(id: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            id: id.into(),
            schedule,
            max_instances: 3,
            misfire_grace: Duration::from_secs(300),
        }
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }
}

/// Per-run context handed to the job callback. Jobs receive their
/// dependencies at registration time and their fire context here; nothing
/// ambient is captured.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub scheduled_for: DateTime<Utc>,
}

/// A job callback returns a future resolving to the run outcome
pub type JobCallback =
    Arc<dyn Fn(JobContext) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// How one scheduler tick ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "detail", rename_all = "lowercase")]
pub enum JobOutcome {
    Success,
    Failed(String),
    Skipped(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }
}

/// Append-only record of one scheduler tick: success, failure, or skip.
/// Written after the run completes, never before.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    pub job_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: JobOutcome,
    pub duration_ms: u64,
    /// Completed successfully but exceeded the slow-job threshold
    pub slow: bool,
}

impl JobExecutionRecord {
    pub fn started(job_id: impl Into<String>, scheduled_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            scheduled_time,
            started_at: now,
            finished_at: now,
            outcome: JobOutcome::Success,
            duration_ms: 0,
            slow: false,
        }
    }

    fn skipped(job_id: &str, scheduled_time: DateTime<Utc>, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            scheduled_time,
            started_at: now,
            finished_at: now,
            outcome: JobOutcome::Skipped(reason.to_string()),
            duration_ms: 0,
            slow: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    Run,
    SkipMisfire,
    SkipSaturated,
}

/// Decide what to do with one tick given its lateness and the job's
/// in-flight run count.
fn tick_disposition(
    lateness: Duration,
    grace: Duration,
    running: usize,
    max_instances: usize,
) -> Disposition {
    if lateness > grace {
        Disposition::SkipMisfire
    } else if running >= max_instances {
        Disposition::SkipSaturated
    } else {
        Disposition::Run
    }
}

/// The process-wide scheduler. Job callbacks execute in parallel on the
/// tokio worker pool; each run is an isolated task.
pub struct Scheduler {
    jobs: Vec<(JobDescriptor, JobCallback)>,
    log: Arc<dyn ExecutionLog>,
    timezone: FixedOffset,
    slow_threshold: Duration,
    cancel: CancellationToken,
    abort: CancellationToken,
    tracker: TaskTracker,
    started: bool,
}

impl Scheduler {
    pub fn new(log: Arc<dyn ExecutionLog>, timezone: FixedOffset, slow_threshold: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            log,
            timezone,
            slow_threshold,
            cancel: CancellationToken::new(),
            abort: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: false,
        }
    }

    /// Register a job. Fails on duplicate ids or invalid descriptors;
    /// registration failures are the scheduler's only fatal error path.
    pub fn register(&mut self, descriptor: JobDescriptor, callback: JobCallback) -> ScheduleResult<()> {
        if self.started {
            return Err(ScheduleError::StartupFailed {
                reason: "scheduler already started".to_string(),
            });
        }
        if descriptor.id.is_empty() {
            return Err(ScheduleError::InvalidDescriptor {
                id: descriptor.id,
                reason: "empty job id".to_string(),
            });
        }
        if self.jobs.iter().any(|(d, _)| d.id == descriptor.id) {
            return Err(ScheduleError::DuplicateJob { id: descriptor.id });
        }
        if descriptor.max_instances == 0 {
            return Err(ScheduleError::InvalidDescriptor {
                id: descriptor.id,
                reason: "max_instances must be at least 1".to_string(),
            });
        }
        match descriptor.schedule {
            Schedule::Every(interval) if interval.is_zero() => {
                return Err(ScheduleError::InvalidDescriptor {
                    id: descriptor.id,
                    reason: "interval must be non-zero".to_string(),
                });
            }
            Schedule::DailyAt { hour, minute } if hour > 23 || minute > 59 => {
                return Err(ScheduleError::InvalidDescriptor {
                    id: descriptor.id,
                    reason: format!("invalid fire time {hour}:{minute}"),
                });
            }
            _ => {}
        }
        self.jobs.push((descriptor, callback));
        Ok(())
    }

    /// Start one driver task per registered job
    pub fn start(&mut self) -> ScheduleResult<()> {
        if self.started {
            return Err(ScheduleError::StartupFailed {
                reason: "scheduler already started".to_string(),
            });
        }
        self.started = true;

        for (descriptor, callback) in &self.jobs {
            tracing::info!(job = %descriptor.id, "Scheduling job");
            self.tracker.spawn(drive_job(
                descriptor.clone(),
                callback.clone(),
                self.log.clone(),
                self.timezone,
                self.slow_threshold,
                self.cancel.clone(),
                self.abort.clone(),
                self.tracker.clone(),
            ));
        }

        tracing::info!(jobs = self.jobs.len(), "Scheduler started");
        Ok(())
    }

    /// Process-wide shutdown: stop issuing new runs, wait up to `grace`
    /// for in-flight runs, then abandon the rest (recorded as failed).
    pub async fn stop(&self, grace: Duration) {
        tracing::info!(grace_secs = grace.as_secs(), "Stopping scheduler");
        self.cancel.cancel();
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!("Shutdown grace period expired, abandoning in-flight runs");
            self.abort.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(1), self.tracker.wait()).await;
        }

        tracing::info!("Scheduler stopped");
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_job(
    descriptor: JobDescriptor,
    callback: JobCallback,
    log: Arc<dyn ExecutionLog>,
    timezone: FixedOffset,
    slow_threshold: Duration,
    cancel: CancellationToken,
    abort: CancellationToken,
    tracker: TaskTracker,
) {
    let running = Arc::new(AtomicUsize::new(0));
    let mut next = descriptor.schedule.first_fire(Utc::now(), timezone);

    loop {
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let now = Utc::now();
        let scheduled_for = next;
        next = descriptor.schedule.advance_past(scheduled_for, now, timezone);

        let lateness = (now - scheduled_for).to_std().unwrap_or(Duration::ZERO);
        match tick_disposition(
            lateness,
            descriptor.misfire_grace,
            running.load(Ordering::SeqCst),
            descriptor.max_instances,
        ) {
            Disposition::SkipMisfire => {
                tracing::warn!(
                    job = %descriptor.id,
                    lateness_secs = lateness.as_secs(),
                    "Missed run beyond misfire grace, skipping"
                );
                record(&log, JobExecutionRecord::skipped(
                    &descriptor.id,
                    scheduled_for,
                    "missed misfire grace period",
                ));
            }
            Disposition::SkipSaturated => {
                tracing::warn!(
                    job = %descriptor.id,
                    max_instances = descriptor.max_instances,
                    "Concurrency cap reached, skipping run"
                );
                record(&log, JobExecutionRecord::skipped(
                    &descriptor.id,
                    scheduled_for,
                    "max concurrent instances reached",
                ));
            }
            Disposition::Run => {
                running.fetch_add(1, Ordering::SeqCst);
                tracker.spawn(execute_run(
                    descriptor.id.clone(),
                    scheduled_for,
                    callback.clone(),
                    log.clone(),
                    slow_threshold,
                    abort.clone(),
                    running.clone(),
                ));
            }
        }
    }
}

async fn execute_run(
    job_id: String,
    scheduled_for: DateTime<Utc>,
    callback: JobCallback,
    log: Arc<dyn ExecutionLog>,
    slow_threshold: Duration,
    abort: CancellationToken,
    running: Arc<AtomicUsize>,
) {
    let started_at = Utc::now();
    let clock = Instant::now();
    let ctx = JobContext { job_id: job_id.clone(), scheduled_for };

    // Isolation boundary: the callback runs in its own task so a panic
    // surfaces as a JoinError instead of unwinding the scheduler.
    let mut handle = tokio::spawn((callback)(ctx));
    let outcome = tokio::select! {
        result = &mut handle => match result {
            Ok(Ok(())) => JobOutcome::Success,
            Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
            Err(join_err) if join_err.is_panic() => {
                JobOutcome::Failed(format!("job panicked: {join_err}"))
            }
            Err(join_err) => JobOutcome::Failed(join_err.to_string()),
        },
        _ = abort.cancelled() => {
            handle.abort();
            JobOutcome::Failed("timed out during shutdown".to_string())
        }
    };
    running.fetch_sub(1, Ordering::SeqCst);

    let duration = clock.elapsed();
    let slow = outcome.is_success() && duration > slow_threshold;
    match &outcome {
        JobOutcome::Success if slow => {
            tracing::warn!(job = %job_id, duration_ms = duration.as_millis() as u64, "Slow job run");
        }
        JobOutcome::Success => {
            tracing::debug!(job = %job_id, duration_ms = duration.as_millis() as u64, "Job run completed");
        }
        JobOutcome::Failed(reason) => {
            tracing::error!(job = %job_id, %reason, "Job run failed");
        }
        JobOutcome::Skipped(_) => {}
    }

    record(&log, JobExecutionRecord {
        job_id,
        scheduled_time: scheduled_for,
        started_at,
        finished_at: Utc::now(),
        outcome,
        duration_ms: duration.as_millis() as u64,
        slow,
    });
}

fn record(log: &Arc<dyn ExecutionLog>, execution: JobExecutionRecord) {
    if let Err(e) = log.record(execution) {
        tracing::error!("Failed to record job execution: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_tick_disposition() {
        let grace = Duration::from_secs(300);
        assert_eq!(tick_disposition(Duration::ZERO, grace, 0, 3), Disposition::Run);
        assert_eq!(tick_disposition(Duration::from_secs(301), grace, 0, 3), Disposition::SkipMisfire);
        assert_eq!(tick_disposition(Duration::ZERO, grace, 3, 3), Disposition::SkipSaturated);
        assert_eq!(tick_disposition(Duration::from_secs(299), grace, 2, 3), Disposition::Run);
    }

    #[test]
    fn test_next_daily_same_and_next_day() {
        let tz = utc_offset();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        let fire = next_daily(after, 12, 30, tz);
        assert_eq!(fire, Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap());

        let fire = next_daily(after, 3, 0, tz);
        assert_eq!(fire, Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_next_daily_respects_offset() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        // 10:00 UTC is 18:00 local; 03:00 local next day is 19:00 UTC today
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let fire = next_daily(after, 3, 0, tz);
        assert_eq!(fire, Utc.with_ymd_and_hms(2024, 1, 1, 19, 0, 0).unwrap());
    }

    #[test]
    fn test_advance_past_coalesces_missed_intervals() {
        let schedule = Schedule::Every(Duration::from_secs(60));
        let fired = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // 3.5 intervals have elapsed; missed ticks collapse into one advance
        let now = fired + chrono::Duration::seconds(210);
        let next = schedule.advance_past(fired, now, utc_offset());
        assert_eq!(next, fired + chrono::Duration::seconds(240));
    }

    #[test]
    fn test_register_rejects_invalid_descriptors() {
        let log: Arc<dyn ExecutionLog> = Arc::new(MemoryStore::new());
        let mut scheduler = Scheduler::new(log, utc_offset(), Duration::from_secs(5));
        let noop: JobCallback = Arc::new(|_ctx| Box::pin(async { Ok(()) }));

        let ok = JobDescriptor::new("a", Schedule::Every(Duration::from_secs(1)));
        scheduler.register(ok.clone(), noop.clone()).unwrap();

        assert!(matches!(
            scheduler.register(ok, noop.clone()),
            Err(ScheduleError::DuplicateJob { .. })
        ));
        assert!(scheduler
            .register(
                JobDescriptor::new("b", Schedule::Every(Duration::ZERO)),
                noop.clone()
            )
            .is_err());
        assert!(scheduler
            .register(
                JobDescriptor::new("c", Schedule::DailyAt { hour: 24, minute: 0 }),
                noop.clone()
            )
            .is_err());
        assert!(scheduler
            .register(
                JobDescriptor::new("d", Schedule::Every(Duration::from_secs(1)))
                    .with_max_instances(0),
                noop
            )
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_records_skips() {
        let store = Arc::new(MemoryStore::new());
        let log: Arc<dyn ExecutionLog> = store.clone();
        let mut scheduler = Scheduler::new(log, utc_offset(), Duration::from_secs(5));

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_cb, peak_cb) = (active.clone(), peak.clone());
        let callback: JobCallback = Arc::new(move |_ctx| {
            let active = active_cb.clone();
            let peak = peak_cb.clone();
            Box::pin(async move {
                let cur = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(cur, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(120)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        scheduler
            .register(
                JobDescriptor::new("blocker", Schedule::Every(Duration::from_millis(50)))
                    .with_max_instances(1),
                callback,
            )
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        scheduler.stop(Duration::from_secs(1)).await;

        let records = store.recent(Some("blocker"), 50).unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().any(|r| r.outcome.is_success()));
        assert!(records
            .iter()
            .any(|r| matches!(&r.outcome, JobOutcome::Skipped(reason) if reason.contains("max concurrent"))));
        // the overlapping tick was skipped, never run concurrently
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_fault_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let log: Arc<dyn ExecutionLog> = store.clone();
        let mut scheduler = Scheduler::new(log, utc_offset(), Duration::from_secs(5));

        let panicky: JobCallback = Arc::new(|_ctx| {
            Box::pin(async {
                panic!("probe exploded");
            })
        });
        let healthy_runs = Arc::new(AtomicUsize::new(0));
        let counter = healthy_runs.clone();
        let healthy: JobCallback = Arc::new(move |_ctx| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        scheduler
            .register(
                JobDescriptor::new("panicky", Schedule::Every(Duration::from_millis(50))),
                panicky,
            )
            .unwrap();
        scheduler
            .register(
                JobDescriptor::new("healthy", Schedule::Every(Duration::from_millis(50))),
                healthy,
            )
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop(Duration::from_secs(1)).await;

        let failures = store.recent(Some("panicky"), 50).unwrap();
        assert!(failures
            .iter()
            .all(|r| matches!(&r.outcome, JobOutcome::Failed(reason) if reason.contains("panicked"))));
        assert!(!failures.is_empty());
        assert!(healthy_runs.load(Ordering::SeqCst) >= failures.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_overlong_runs() {
        let store = Arc::new(MemoryStore::new());
        let log: Arc<dyn ExecutionLog> = store.clone();
        let mut scheduler = Scheduler::new(log, utc_offset(), Duration::from_secs(5));

        let stuck: JobCallback = Arc::new(|_ctx| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        });
        scheduler
            .register(
                JobDescriptor::new("stuck", Schedule::Every(Duration::from_millis(10)))
                    .with_max_instances(1),
                stuck,
            )
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop(Duration::from_millis(50)).await;

        let records = store.recent(Some("stuck"), 50).unwrap();
        assert!(records
            .iter()
            .any(|r| matches!(&r.outcome, JobOutcome::Failed(reason) if reason.contains("timed out"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_tick_yields_exactly_one_record() {
        let store = Arc::new(MemoryStore::new());
        let log: Arc<dyn ExecutionLog> = store.clone();
        let mut scheduler = Scheduler::new(log, utc_offset(), Duration::from_secs(5));

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let callback: JobCallback = Arc::new(move |_ctx| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        scheduler
            .register(
                JobDescriptor::new("steady", Schedule::Every(Duration::from_millis(100))),
                callback,
            )
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(550)).await;
        scheduler.stop(Duration::from_secs(1)).await;

        let records = store.recent(Some("steady"), 50).unwrap();
        assert_eq!(records.len(), runs.load(Ordering::SeqCst));
        assert!(records.iter().all(|r| r.outcome.is_success()));
        assert!(records.iter().all(|r| r.finished_at >= r.started_at));
    }
}
