//! Service reachability probing
//!
//! Contract for checking whether an external service endpoint is reachable.
//! The monitoring core only depends on the trait; concrete transports live
//! with their integrations.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Result of one reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
    /// The caller-supplied timeout elapsed before a verdict
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub target: String,
    pub status: ProbeStatus,
    /// Round-trip latency; absent unless the probe reached the target
    pub latency: Option<Duration>,
}

/// A reachability check against one service endpoint. Implementations must
/// return within the supplied timeout, reporting `Timeout` instead of
/// blocking past it.
pub trait ServiceProbe: Send + Sync {
    fn target(&self) -> &str;

    fn check(&self, timeout: Duration) -> ProbeReport;
}

/// Probe for targets with no configured transport; always reports `Up`
/// with zero latency
pub struct NoopProbe {
    target: String,
}

impl NoopProbe {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }
}

impl ServiceProbe for NoopProbe {
    fn target(&self) -> &str {
        &self.target
    }

    fn check(&self, _timeout: Duration) -> ProbeReport {
        let start = Instant::now();
        ProbeReport {
            target: self.target.clone(),
            status: ProbeStatus::Up,
            latency: Some(start.elapsed()),
        }
    }
}
