//! Error handling for the hostwatch monitoring daemon
//!
//! This module provides error types for all monitoring operations,
//! including metric probes, store access, scheduling, and alert delivery.

use std::io;

use thiserror::Error;

/// The main error type for the monitoring daemon
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Metric probe errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Store related errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Scheduler related errors
    #[error("Scheduling error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Alert delivery errors
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Failure of a single metric sub-probe. Absorbed at the sampler boundary:
/// the affected snapshot fields default to zero/empty and the cycle continues.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe '{probe}' unavailable: {reason}")]
    Unavailable { probe: &'static str, reason: String },

    #[error("Probe '{probe}' timed out after {timeout_ms}ms")]
    Timeout { probe: &'static str, timeout_ms: u64 },
}

/// Store related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Directory creation failed: {path}")]
    DirectoryCreationFailed { path: String },

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },
}

/// Scheduler errors. Only registration/startup failures are fatal; a fault
/// inside a job callback is recorded in its execution record instead.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Duplicate job id: {id}")]
    DuplicateJob { id: String },

    #[error("Invalid job descriptor for '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("Scheduler startup failed: {reason}")]
    StartupFailed { reason: String },
}

/// A fault raised by a job callback. Isolated per job and recorded in the
/// job's execution record; never propagates to the scheduler or sibling jobs.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        JobError(err.to_string())
    }
}

/// Notifier delivery errors. Logged, never retried synchronously inline.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Alert delivery failed: {reason}")]
    SendFailed { reason: String },

    #[error("No delivery target configured")]
    NoTarget,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A specialized result type for probe operations
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// A specialized result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for scheduler operations
pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;

impl MonitorError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Probe(_) => "probe",
            MonitorError::Store(_) => "store",
            MonitorError::Config(_) => "config",
            MonitorError::Schedule(_) => "schedule",
            MonitorError::Delivery(_) => "delivery",
            MonitorError::Io(_) => "io",
            MonitorError::Serialization(_) => "serialization",
            MonitorError::Generic(_) => "generic",
        }
    }

    /// Whether steady-state operation may continue past this error.
    /// Only scheduler startup failures abort the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::Schedule(_) | MonitorError::Config(_))
    }
}

impl From<String> for MonitorError {
    fn from(msg: String) -> Self {
        MonitorError::Generic(msg)
    }
}

impl From<&str> for MonitorError {
    fn from(msg: &str) -> Self {
        MonitorError::Generic(msg.to_string())
    }
}
