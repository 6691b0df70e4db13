//! Alert delivery
//!
//! The `Notifier` trait is the contract between the monitoring core and
//! whatever carries alerts out of the process. Delivery failures are logged
//! and dropped; the evaluator never blocks or retries on a notifier.

use crate::error::DeliveryError;
use crate::metrics::AlertEvent;

/// Outbound alert channel. Implementations must be cheap enough to call
/// inline from the collection cycle or hand off internally.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, alert: &AlertEvent) -> Result<(), DeliveryError>;
}

/// Default notifier: structured log records, one per alert
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&self, alert: &AlertEvent) -> Result<(), DeliveryError> {
        if alert.predicted {
            tracing::warn!(
                rule = %alert.rule,
                value = alert.value,
                threshold = alert.threshold,
                severity = ?alert.severity,
                "Predicted threshold breach"
            );
        } else {
            tracing::warn!(
                rule = %alert.rule,
                value = alert.value,
                threshold = alert.threshold,
                severity = ?alert.severity,
                "ALERT"
            );
        }
        Ok(())
    }
}

/// Used when no delivery capability is configured
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn name(&self) -> &str {
        "noop"
    }

    fn send(&self, _alert: &AlertEvent) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Fan an alert batch out to every notifier. A failing notifier is logged
/// and skipped; the rest still receive the alert.
pub fn dispatch(notifiers: &[Box<dyn Notifier>], alerts: &[AlertEvent]) {
    for alert in alerts {
        for notifier in notifiers {
            if let Err(e) = notifier.send(alert) {
                tracing::error!(
                    notifier = notifier.name(),
                    rule = %alert.rule,
                    "Alert delivery failed: {}",
                    e
                );
            }
        }
    }
}
