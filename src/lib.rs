//! hostwatch monitoring library
//!
//! This library provides the core functionality for the hostwatch daemon:
//! continuous system metric sampling, threshold alerting, scheduled
//! analysis and retention jobs, and trend prediction.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod notify;
pub mod probe;
pub mod sampler;
pub mod scheduler;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use evaluator::Evaluator;
pub use metrics::{AlertEvent, MetricCategory, MetricPoint, Snapshot, ThresholdRule, TrendReport};
pub use notify::{LogNotifier, NoopNotifier, Notifier};
pub use sampler::{Sampler, SharedSnapshot};
pub use scheduler::{JobDescriptor, JobExecutionRecord, JobOutcome, Schedule, Scheduler};
pub use service::{MonitorService, ServiceState, ServiceStatus};
pub use store::{ExecutionLog, JsonlStore, MemoryStore, MetricStore, ReportStore};
