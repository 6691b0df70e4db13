//! Configuration management for the hostwatch daemon
//!
//! Handles loading, parsing, and validating configuration from TOML files
//! and environment variables.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::metrics::{CompareOp, MetricCategory, Severity, ThresholdRule};

/// Main configuration structure for the monitoring daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between metric collection cycles
    pub collection_interval_seconds: u64,

    /// Days of metric history to retain
    pub retention_days: u32,

    /// Number of top-CPU processes kept per snapshot
    pub top_process_count: usize,

    /// Alert threshold rules, keyed by a short label
    pub thresholds: BTreeMap<String, ThresholdRuleConfig>,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Defaults applied to every job descriptor
    pub job_defaults: JobDefaultsConfig,

    /// Cadence configuration for the built-in jobs
    pub jobs: JobsConfig,

    /// Analysis and prediction configuration
    pub analysis: AnalysisConfig,

    /// Metric store configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// One threshold rule as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdRuleConfig {
    pub category: MetricCategory,
    pub metric: String,
    pub op: CompareOp,
    pub value: f64,
    /// Minimum sustained breach duration in seconds
    pub duration_seconds: u64,
    pub severity: Severity,
    pub enabled: bool,
    pub targets: Vec<String>,
}

impl Default for ThresholdRuleConfig {
    fn default() -> Self {
        Self {
            category: MetricCategory::Cpu,
            metric: "usage".to_string(),
            op: CompareOp::Gt,
            value: 80.0,
            duration_seconds: 0,
            severity: Severity::Warning,
            enabled: true,
            targets: Vec::new(),
        }
    }
}

impl ThresholdRuleConfig {
    pub fn to_rule(&self) -> ThresholdRule {
        ThresholdRule {
            category: self.category,
            metric: self.metric.clone(),
            op: self.op,
            value: self.value,
            duration: std::time::Duration::from_secs(self.duration_seconds),
            severity: self.severity,
            enabled: self.enabled,
            targets: self.targets.clone(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed-offset timezone for cron-style jobs: "UTC" or "+08:00"
    pub timezone: String,

    /// Grace period for in-flight jobs during shutdown, in seconds
    pub shutdown_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { timezone: "UTC".to_string(), shutdown_grace_seconds: 30 }
    }
}

impl SchedulerConfig {
    /// Parse the configured timezone into a fixed offset
    pub fn offset(&self) -> ConfigResult<FixedOffset> {
        if self.timezone.eq_ignore_ascii_case("utc") {
            // east_opt(0) is always in range
            return FixedOffset::east_opt(0).ok_or_else(|| ConfigError::InvalidValue {
                field: "scheduler.timezone".to_string(),
                value: self.timezone.clone(),
            });
        }
        self.timezone.parse::<FixedOffset>().map_err(|_| ConfigError::InvalidValue {
            field: "scheduler.timezone".to_string(),
            value: self.timezone.clone(),
        })
    }
}

/// Defaults applied to every job descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaultsConfig {
    /// Maximum concurrently executing instances per job
    pub max_instances: usize,

    /// Maximum delay after a scheduled time within which a late run is
    /// still executed instead of skipped
    pub misfire_grace_seconds: u64,
}

impl Default for JobDefaultsConfig {
    fn default() -> Self {
        Self { max_instances: 3, misfire_grace_seconds: 300 }
    }
}

/// Cadence configuration for the built-in jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub analysis_interval_minutes: u64,
    pub prediction_interval_hours: u64,
    /// Daily cleanup fire time (scheduler timezone)
    pub cleanup_hour: u32,
    pub cleanup_minute: u32,
    /// Runs longer than this are flagged as slow
    pub slow_job_threshold_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            analysis_interval_minutes: 30,
            prediction_interval_hours: 6,
            cleanup_hour: 3,
            cleanup_minute: 0,
            slow_job_threshold_seconds: 5,
        }
    }
}

/// Analysis and prediction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Trailing window for trend analysis, in hours
    pub window_hours: u64,

    /// Trailing window the predictor fits over, in days
    pub prediction_window_days: u64,

    /// Number of future points to extrapolate
    pub prediction_horizon_points: usize,

    /// Forecast values above this trigger a predicted-breach alert
    pub predicted_breach_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            prediction_window_days: 7,
            prediction_horizon_points: 24,
            predicted_breach_threshold: 90.0,
        }
    }
}

/// Metric store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Jsonl,
}

/// Metric store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StoreKind,

    /// Base directory for the JSONL store
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let default_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("hostwatch");
        Self { kind: StoreKind::Memory, base_path: default_path }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "cpu_usage".to_string(),
            ThresholdRuleConfig {
                category: MetricCategory::Cpu,
                metric: "usage".to_string(),
                value: 80.0,
                ..ThresholdRuleConfig::default()
            },
        );
        thresholds.insert(
            "memory_usage".to_string(),
            ThresholdRuleConfig {
                category: MetricCategory::Memory,
                metric: "usage".to_string(),
                value: 85.0,
                ..ThresholdRuleConfig::default()
            },
        );
        thresholds.insert(
            "disk_usage".to_string(),
            ThresholdRuleConfig {
                category: MetricCategory::Disk,
                metric: "usage".to_string(),
                value: 90.0,
                ..ThresholdRuleConfig::default()
            },
        );

        Self {
            collection_interval_seconds: 300,
            retention_days: 30,
            top_process_count: 5,
            thresholds,
            scheduler: SchedulerConfig::default(),
            job_defaults: JobDefaultsConfig::default(),
            jobs: JobsConfig::default(),
            analysis: AnalysisConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        })?;

        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (HOSTWATCH_*)
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        if let Ok(interval) = std::env::var("HOSTWATCH_COLLECTION_INTERVAL") {
            self.collection_interval_seconds = interval.parse().map_err(|_| {
                ConfigError::InvalidValue {
                    field: "HOSTWATCH_COLLECTION_INTERVAL".to_string(),
                    value: interval,
                }
            })?;
        }

        if let Ok(retention) = std::env::var("HOSTWATCH_RETENTION_DAYS") {
            self.retention_days = retention.parse().map_err(|_| ConfigError::InvalidValue {
                field: "HOSTWATCH_RETENTION_DAYS".to_string(),
                value: retention,
            })?;
        }

        if let Ok(base_path) = std::env::var("HOSTWATCH_BASE_PATH") {
            self.storage.base_path = PathBuf::from(base_path);
        }

        if let Ok(level) = std::env::var("HOSTWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Load configuration with fallback order: file -> env -> defaults
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) if path.as_ref().exists() => MonitorConfig::from_file(path)?,
            _ => MonitorConfig::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the evaluator rule set from the configured thresholds
    pub fn rules(&self) -> Vec<ThresholdRule> {
        self.thresholds.values().map(ThresholdRuleConfig::to_rule).collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.collection_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collection_interval_seconds".to_string(),
                value: "0".to_string(),
            });
        }

        if self.retention_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retention_days".to_string(),
                value: "0".to_string(),
            });
        }

        if self.top_process_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "top_process_count".to_string(),
                value: "0".to_string(),
            });
        }

        if self.job_defaults.max_instances == 0 {
            return Err(ConfigError::InvalidValue {
                field: "job_defaults.max_instances".to_string(),
                value: "0".to_string(),
            });
        }

        if self.jobs.cleanup_hour > 23 || self.jobs.cleanup_minute > 59 {
            return Err(ConfigError::InvalidValue {
                field: "jobs.cleanup_hour".to_string(),
                value: format!("{}:{}", self.jobs.cleanup_hour, self.jobs.cleanup_minute),
            });
        }

        if self.analysis.prediction_horizon_points == 0 {
            return Err(ConfigError::InvalidValue {
                field: "analysis.prediction_horizon_points".to_string(),
                value: "0".to_string(),
            });
        }

        self.scheduler.offset()?;

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("hostwatch").join("hostwatch.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content).map_err(|_| ConfigError::PermissionDenied {
            path: path.to_string_lossy().to_string(),
        })?;

        Ok(())
    }
}
