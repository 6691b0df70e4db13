//! Monitor service orchestration
//!
//! Wires the sampler, store, evaluator, notifiers, analyzer, and scheduler
//! into one long-running daemon: four recurring jobs on independent
//! cadences, a shared latest-snapshot handle, and a signal-driven shutdown
//! path with a bounded grace period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzer::{self, AnalysisOutcome};
use crate::config::{MonitorConfig, StoreKind};
use crate::error::{JobError, MonitorError, Result};
use crate::evaluator::Evaluator;
use crate::metrics::{MetricCategory, MetricPoint};
use crate::notify::{dispatch, LogNotifier, Notifier};
use crate::sampler::{Sampler, SharedSnapshot};
use crate::scheduler::{JobCallback, JobDescriptor, Schedule, Scheduler};
use crate::store::{ExecutionLog, JsonlStore, MemoryStore, MetricStore, ReportStore};

/// Lifecycle state of the monitor service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Point-in-time view of the service for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ServiceState {
    pub status: ServiceStatus,
    pub cycles_completed: u64,
    pub alerts_emitted: u64,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

/// Everything one collection cycle needs, cloned into the job callback
#[derive(Clone)]
struct CollectionDeps {
    sampler: Arc<tokio::sync::Mutex<Sampler>>,
    shared: Arc<SharedSnapshot>,
    metrics: Arc<dyn MetricStore>,
    evaluator: Arc<Mutex<Evaluator>>,
    notifiers: Arc<Vec<Box<dyn Notifier>>>,
    /// Batches that failed to persist, retried on the next cycle
    pending: Arc<Mutex<Vec<MetricPoint>>>,
    cycles: Arc<AtomicU64>,
    alerts: Arc<AtomicU64>,
}

/// Upper bound on buffered points awaiting a store retry
const MAX_PENDING_POINTS: usize = 4096;

const ANALYZED_METRICS: [(MetricCategory, &str); 3] = [
    (MetricCategory::Cpu, "usage"),
    (MetricCategory::Memory, "usage"),
    (MetricCategory::Disk, "usage"),
];

/// The host monitoring daemon
pub struct MonitorService {
    config: MonitorConfig,
    metrics: Arc<dyn MetricStore>,
    log: Arc<dyn ExecutionLog>,
    reports: Arc<dyn ReportStore>,
    sampler: Arc<tokio::sync::Mutex<Sampler>>,
    shared: Arc<SharedSnapshot>,
    evaluator: Arc<Mutex<Evaluator>>,
    notifiers: Arc<Vec<Box<dyn Notifier>>>,
    pending: Arc<Mutex<Vec<MetricPoint>>>,
    scheduler: Scheduler,
    status: Arc<RwLock<ServiceStatus>>,
    cycles: Arc<AtomicU64>,
    alerts: Arc<AtomicU64>,
}

impl MonitorService {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;

        let (metrics, log, reports): (
            Arc<dyn MetricStore>,
            Arc<dyn ExecutionLog>,
            Arc<dyn ReportStore>,
        ) = match config.storage.kind {
            StoreKind::Memory => {
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store.clone(), store)
            }
            StoreKind::Jsonl => {
                let store = Arc::new(JsonlStore::new(&config.storage.base_path)?);
                (store.clone(), store.clone(), store)
            }
        };

        let evaluator = Evaluator::new(config.rules());
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        let scheduler = Scheduler::new(
            log.clone(),
            config.scheduler.offset()?,
            Duration::from_secs(config.jobs.slow_job_threshold_seconds),
        );

        Ok(Self {
            sampler: Arc::new(tokio::sync::Mutex::new(Sampler::new(config.top_process_count))),
            shared: Arc::new(SharedSnapshot::new()),
            evaluator: Arc::new(Mutex::new(evaluator)),
            notifiers: Arc::new(notifiers),
            pending: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(RwLock::new(ServiceStatus::Stopped)),
            cycles: Arc::new(AtomicU64::new(0)),
            alerts: Arc::new(AtomicU64::new(0)),
            config,
            metrics,
            log,
            reports,
            scheduler,
        })
    }

    /// Register the recurring jobs and start the scheduler. Any
    /// registration failure aborts startup.
    pub fn start(&mut self) -> Result<()> {
        self.set_status(ServiceStatus::Starting);
        tracing::info!("Starting monitor service");

        let defaults = &self.config.job_defaults;
        let misfire = Duration::from_secs(defaults.misfire_grace_seconds);

        let deps = self.collection_deps();
        let collect: JobCallback = Arc::new(move |_ctx| {
            let deps = deps.clone();
            Box::pin(async move { run_collection_cycle(deps).await })
        });
        self.scheduler.register(
            JobDescriptor::new(
                "collect_metrics",
                Schedule::Every(Duration::from_secs(self.config.collection_interval_seconds)),
            )
            .with_max_instances(defaults.max_instances)
            .with_misfire_grace(misfire),
            collect,
        )?;

        let metrics = self.metrics.clone();
        let reports = self.reports.clone();
        let window = Duration::from_secs(self.config.analysis.window_hours * 3600);
        let analyze: JobCallback = Arc::new(move |_ctx| {
            let metrics = metrics.clone();
            let reports = reports.clone();
            Box::pin(async move { run_analysis(metrics, reports, window).await })
        });
        self.scheduler.register(
            JobDescriptor::new(
                "analyze_performance",
                Schedule::Every(Duration::from_secs(self.config.jobs.analysis_interval_minutes * 60)),
            )
            .with_max_instances(defaults.max_instances)
            .with_misfire_grace(misfire),
            analyze,
        )?;

        let metrics = self.metrics.clone();
        let log = self.log.clone();
        let retention_days = self.config.retention_days;
        let cleanup: JobCallback = Arc::new(move |_ctx| {
            let metrics = metrics.clone();
            let log = log.clone();
            Box::pin(async move { run_cleanup(metrics, log, retention_days).await })
        });
        self.scheduler.register(
            JobDescriptor::new(
                "cleanup_old_data",
                Schedule::DailyAt {
                    hour: self.config.jobs.cleanup_hour,
                    minute: self.config.jobs.cleanup_minute,
                },
            )
            .with_max_instances(1)
            .with_misfire_grace(misfire),
            cleanup,
        )?;

        let metrics = self.metrics.clone();
        let reports = self.reports.clone();
        let notifiers = self.notifiers.clone();
        let analysis = self.config.analysis.clone();
        let predict: JobCallback = Arc::new(move |_ctx| {
            let metrics = metrics.clone();
            let reports = reports.clone();
            let notifiers = notifiers.clone();
            let analysis = analysis.clone();
            Box::pin(async move { run_prediction(metrics, reports, notifiers, analysis).await })
        });
        self.scheduler.register(
            JobDescriptor::new(
                "predict_resource_usage",
                Schedule::Every(Duration::from_secs(self.config.jobs.prediction_interval_hours * 3600)),
            )
            .with_max_instances(defaults.max_instances)
            .with_misfire_grace(misfire),
            predict,
        )?;

        self.scheduler.start()?;
        self.set_status(ServiceStatus::Running);
        tracing::info!(jobs = self.scheduler.job_count(), "Monitor service running");
        Ok(())
    }

    /// Graceful shutdown with the configured grace period
    pub async fn stop(&self) {
        self.set_status(ServiceStatus::Stopping);
        let grace = Duration::from_secs(self.config.scheduler.shutdown_grace_seconds);
        self.scheduler.stop(grace).await;
        self.set_status(ServiceStatus::Stopped);
        tracing::info!("Monitor service stopped");
    }

    /// Run a single collection cycle outside the schedule
    pub async fn trigger_collection(&self) -> Result<()> {
        run_collection_cycle(self.collection_deps())
            .await
            .map_err(|e| MonitorError::Generic(e.to_string()))
    }

    /// Latest published snapshot, if a cycle has completed
    pub fn latest_snapshot(&self) -> Option<Arc<crate::metrics::Snapshot>> {
        self.shared.latest()
    }

    pub fn state(&self) -> ServiceState {
        ServiceState {
            status: self.current_status(),
            cycles_completed: self.cycles.load(Ordering::SeqCst),
            alerts_emitted: self.alerts.load(Ordering::SeqCst),
            last_snapshot_at: self.shared.latest().map(|s| s.timestamp),
        }
    }

    /// Block until SIGTERM or SIGINT
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(MonitorError::Io)?;
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .map_err(MonitorError::Io)?;

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
        }
        Ok(())
    }

    fn collection_deps(&self) -> CollectionDeps {
        CollectionDeps {
            sampler: self.sampler.clone(),
            shared: self.shared.clone(),
            metrics: self.metrics.clone(),
            evaluator: self.evaluator.clone(),
            notifiers: self.notifiers.clone(),
            pending: self.pending.clone(),
            cycles: self.cycles.clone(),
            alerts: self.alerts.clone(),
        }
    }

    fn set_status(&self, status: ServiceStatus) {
        match self.status.write() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    fn current_status(&self) -> ServiceStatus {
        match self.status.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// One collection cycle: sample, publish, persist (with retry buffering),
/// evaluate, dispatch. A failed store write never blocks evaluation.
async fn run_collection_cycle(deps: CollectionDeps) -> std::result::Result<(), JobError> {
    let snapshot = deps.sampler.lock().await.collect().await;
    if !snapshot.degraded_probes.is_empty() {
        tracing::warn!(probes = ?snapshot.degraded_probes, "Collection cycle degraded");
    }

    let mut batch = match deps.pending.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    batch.extend(snapshot.points());

    if let Err(e) = deps.metrics.insert(&batch) {
        tracing::error!("Metric write failed, buffering {} points for retry: {}", batch.len(), e);
        buffer_pending(&deps.pending, batch);
    }

    let alerts = match deps.evaluator.lock() {
        Ok(mut guard) => guard.evaluate(&snapshot),
        Err(poisoned) => poisoned.into_inner().evaluate(&snapshot),
    };
    deps.shared.publish(snapshot);

    if !alerts.is_empty() {
        deps.alerts.fetch_add(alerts.len() as u64, Ordering::SeqCst);
        dispatch(&deps.notifiers, &alerts);
    }
    deps.cycles.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

/// Stash a failed batch for the next cycle, oldest points dropped first
/// once the buffer cap is reached. Carried points sit at the front of the
/// batch, so an extended store outage sheds its stalest data.
fn buffer_pending(pending: &Mutex<Vec<MetricPoint>>, mut batch: Vec<MetricPoint>) {
    let excess = batch.len().saturating_sub(MAX_PENDING_POINTS);
    if excess > 0 {
        tracing::warn!(dropped = excess, "Pending metric buffer full, dropping oldest points");
        batch.drain(..excess);
    }
    match pending.lock() {
        Ok(mut guard) => *guard = batch,
        Err(poisoned) => *poisoned.into_inner() = batch,
    }
}

/// Trend reports for the core usage metrics over the analysis window
async fn run_analysis(
    metrics: Arc<dyn MetricStore>,
    reports: Arc<dyn ReportStore>,
    window: Duration,
) -> std::result::Result<(), JobError> {
    for (category, metric) in ANALYZED_METRICS {
        match analyzer::analyze_trend(metrics.as_ref(), category, metric, window)? {
            AnalysisOutcome::Ready(report) => {
                match category {
                    MetricCategory::Cpu if report.mean > 70.0 => {
                        tracing::warn!(mean = report.mean, "Sustained high CPU usage over analysis window");
                    }
                    MetricCategory::Memory if report.mean > 80.0 => {
                        tracing::warn!(mean = report.mean, "Sustained high memory usage over analysis window");
                    }
                    _ => {}
                }
                reports.save_report(report)?;
            }
            AnalysisOutcome::InsufficientData { samples } => {
                tracing::debug!(%category, metric, samples, "Not enough samples for trend analysis");
            }
        }
    }
    Ok(())
}

/// Retention cleanup for metric points and execution records
async fn run_cleanup(
    metrics: Arc<dyn MetricStore>,
    log: Arc<dyn ExecutionLog>,
    retention_days: u32,
) -> std::result::Result<(), JobError> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let points_removed = metrics.delete_older_than(cutoff)?;
    let records_removed = log.delete_older_than(cutoff)?;
    tracing::info!(
        points_removed,
        records_removed,
        retention_days,
        "Retention cleanup completed"
    );
    Ok(())
}

/// Forecast reports for the core usage metrics; predicted breaches go out
/// through the regular notifier path.
async fn run_prediction(
    metrics: Arc<dyn MetricStore>,
    reports: Arc<dyn ReportStore>,
    notifiers: Arc<Vec<Box<dyn Notifier>>>,
    analysis: crate::config::AnalysisConfig,
) -> std::result::Result<(), JobError> {
    let window = Duration::from_secs(analysis.prediction_window_days * 86_400);
    for (category, metric) in ANALYZED_METRICS {
        match analyzer::predict(
            metrics.as_ref(),
            category,
            metric,
            window,
            analysis.prediction_horizon_points,
        )? {
            AnalysisOutcome::Ready(report) => {
                if let Some(alert) = analyzer::predicted_breach(&report, analysis.predicted_breach_threshold) {
                    dispatch(&notifiers, std::slice::from_ref(&alert));
                }
                reports.save_report(report)?;
            }
            AnalysisOutcome::InsufficientData { samples } => {
                tracing::debug!(%category, metric, samples, "Not enough samples for prediction");
            }
        }
    }
    Ok(())
}
