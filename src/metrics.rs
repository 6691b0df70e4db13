//! Data model for hostwatch metrics
//!
//! Defines the metric point, snapshot, threshold rule, alert event, and
//! trend report types shared by the sampler, store, evaluator, and analyzer.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a sampled metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    Cpu,
    Memory,
    Disk,
    Network,
    System,
    Process,
}

impl MetricCategory {
    /// Categories whose values are percentages bounded to [0, 100]
    pub fn is_percentage(&self) -> bool {
        matches!(self, MetricCategory::Cpu | MetricCategory::Memory | MetricCategory::Disk)
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricCategory::Cpu => "cpu",
            MetricCategory::Memory => "memory",
            MetricCategory::Disk => "disk",
            MetricCategory::Network => "network",
            MetricCategory::System => "system",
            MetricCategory::Process => "process",
        };
        f.write_str(s)
    }
}

/// A single sampled value. Immutable once written; deleted only by
/// retention cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub category: MetricCategory,
    pub name: String,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(
        timestamp: DateTime<Utc>,
        category: MetricCategory,
        name: impl Into<String>,
        value: f64,
    ) -> Self {
        Self { timestamp, category, name: name.into(), value }
    }
}

/// Cumulative network counters plus derived per-second rates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errors_in: u64,
    pub errors_out: u64,
    pub bytes_sent_speed: f64,
    pub bytes_recv_speed: f64,
    pub packets_sent_speed: f64,
    pub packets_recv_speed: f64,
}

/// One process from the top-N list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub status: String,
}

/// Static-ish host information collected each cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub cpu_count: usize,
    pub physical_cores: usize,
    pub memory_total: u64,
    pub memory_available: u64,
    pub disk_total: u64,
    pub disk_available: u64,
    pub load_1: f64,
    pub load_5: f64,
    pub load_15: f64,
    pub boot_time: u64,
    pub hostname: String,
}

/// One complete set of metrics from a single collection cycle.
///
/// Owned exclusively by the sampling cycle that created it; published to
/// readers as an atomically swapped `Arc` so a partial snapshot is never
/// visible. Probe failures leave their fields zeroed/empty and record the
/// probe name in `degraded_probes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network: NetworkStats,
    pub top_processes: Vec<ProcessSample>,
    pub system: SystemInfo,
    pub degraded_probes: Vec<String>,
}

impl Snapshot {
    /// Flatten this snapshot into the metric point batch for one cycle.
    /// The batch is what the collection job hands to the store in a single
    /// atomic insert, and what the evaluator matches rules against.
    pub fn points(&self) -> Vec<MetricPoint> {
        let t = self.timestamp;
        let mut points = vec![
            MetricPoint::new(t, MetricCategory::Cpu, "usage", self.cpu_percent),
            MetricPoint::new(t, MetricCategory::Memory, "usage", self.memory_percent),
            MetricPoint::new(t, MetricCategory::Disk, "usage", self.disk_percent),
            MetricPoint::new(t, MetricCategory::Network, "bytes_sent", self.network.bytes_sent as f64),
            MetricPoint::new(t, MetricCategory::Network, "bytes_recv", self.network.bytes_recv as f64),
            MetricPoint::new(t, MetricCategory::Network, "bytes_sent_speed", self.network.bytes_sent_speed),
            MetricPoint::new(t, MetricCategory::Network, "bytes_recv_speed", self.network.bytes_recv_speed),
            MetricPoint::new(t, MetricCategory::Network, "packets_sent_speed", self.network.packets_sent_speed),
            MetricPoint::new(t, MetricCategory::Network, "packets_recv_speed", self.network.packets_recv_speed),
            MetricPoint::new(t, MetricCategory::System, "load_1", self.system.load_1),
            MetricPoint::new(t, MetricCategory::System, "load_5", self.system.load_5),
            MetricPoint::new(t, MetricCategory::System, "load_15", self.system.load_15),
        ];
        for proc in &self.top_processes {
            points.push(MetricPoint::new(
                t,
                MetricCategory::Process,
                format!("{}.cpu_percent", proc.name),
                proc.cpu_percent,
            ));
        }
        points
    }

    /// Look up a single metric value in this snapshot by identity
    pub fn metric(&self, category: MetricCategory, name: &str) -> Option<f64> {
        self.points()
            .into_iter()
            .find(|p| p.category == category && p.name == name)
            .map(|p| p.value)
    }
}

/// Comparison operator for threshold rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl CompareOp {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Ge => value >= threshold,
            CompareOp::Le => value <= threshold,
            CompareOp::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
        };
        f.write_str(s)
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A configured alert threshold. Read-only to the monitoring core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub category: MetricCategory,
    pub metric: String,
    pub op: CompareOp,
    pub value: f64,
    /// Minimum sustained breach duration before the rule fires
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub severity: Severity,
    pub enabled: bool,
    pub targets: Vec<String>,
}

impl ThresholdRule {
    /// Short human label, e.g. `cpu.usage > 80`
    pub fn label(&self) -> String {
        format!("{}.{} {} {}", self.category, self.metric, self.op, self.value)
    }
}

/// An alert emitted by the evaluator (or the predictor, for forecast
/// breaches). Consumed immediately by notifier dispatch; not persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub rule: String,
    pub category: MetricCategory,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// True when the breach is predicted from a forecast, not observed
    pub predicted: bool,
    pub targets: Vec<String>,
}

/// Trend direction over an analysis window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Derived statistics for one metric over one window. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReport {
    pub category: MetricCategory,
    pub metric: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub current: f64,
    pub samples: usize,
    pub direction: TrendDirection,
    pub slope: f64,
    /// Extrapolated future values, present only for prediction reports
    pub forecast: Option<Vec<f64>>,
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
