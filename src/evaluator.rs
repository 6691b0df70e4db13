//! Threshold evaluation with sustained-breach gating
//!
//! Each collection cycle the evaluator matches the fresh snapshot against
//! the configured threshold rules. A rule with a non-zero duration must
//! hold continuously for that long before it fires, and it fires exactly
//! once per breach episode: the alert is edge-triggered, re-armed only
//! after the metric recovers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::metrics::{AlertEvent, Snapshot, ThresholdRule};

/// Per-rule breach tracking state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleState {
    /// Condition not met
    Below,
    /// Condition met, sustained-duration requirement not yet satisfied
    Breaching { since: DateTime<Utc> },
    /// Alert already emitted for this episode
    Alerting,
}

/// Evaluates threshold rules against snapshots. Holds the in-memory breach
/// state; a restart resets episodes, so an ongoing breach re-fires after
/// its duration elapses again.
pub struct Evaluator {
    rules: Vec<ThresholdRule>,
    states: HashMap<String, RuleState>,
}

impl Evaluator {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        let states = rules
            .iter()
            .map(|r| (r.label(), RuleState::Below))
            .collect();
        Self { rules, states }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate every enabled rule against one snapshot. Rules whose metric
    /// is absent from the snapshot are left untouched, not reset.
    pub fn evaluate(&mut self, snapshot: &Snapshot) -> Vec<AlertEvent> {
        let now = snapshot.timestamp;
        let mut alerts = Vec::new();

        for rule in &self.rules {
            if !rule.enabled {
                continue;
            }
            let Some(value) = snapshot.metric(rule.category, &rule.metric) else {
                continue;
            };
            let label = rule.label();
            let state = self.states.entry(label.clone()).or_insert(RuleState::Below);

            if rule.op.holds(value, rule.value) {
                match *state {
                    RuleState::Below => {
                        if rule.duration.is_zero() {
                            alerts.push(make_alert(rule, value, now));
                            *state = RuleState::Alerting;
                        } else {
                            *state = RuleState::Breaching { since: now };
                        }
                    }
                    RuleState::Breaching { since } => {
                        let held = (now - since)
                            .to_std()
                            .unwrap_or(std::time::Duration::ZERO);
                        if held >= rule.duration {
                            alerts.push(make_alert(rule, value, now));
                            *state = RuleState::Alerting;
                        }
                    }
                    RuleState::Alerting => {}
                }
            } else if *state != RuleState::Below {
                tracing::debug!(rule = %label, value, "Rule recovered");
                *state = RuleState::Below;
            }
        }

        alerts
    }
}

fn make_alert(rule: &ThresholdRule, value: f64, timestamp: DateTime<Utc>) -> AlertEvent {
    tracing::warn!(
        rule = %rule.label(),
        value,
        threshold = rule.value,
        severity = ?rule.severity,
        "Threshold breached"
    );
    AlertEvent {
        rule: rule.label(),
        category: rule.category,
        metric: rule.metric.clone(),
        value,
        threshold: rule.value,
        severity: rule.severity,
        timestamp,
        predicted: false,
        targets: rule.targets.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CompareOp, MetricCategory, Severity};
    use chrono::TimeZone;
    use std::time::Duration;

    fn cpu_rule(duration_secs: u64) -> ThresholdRule {
        ThresholdRule {
            category: MetricCategory::Cpu,
            metric: "usage".to_string(),
            op: CompareOp::Gt,
            value: 80.0,
            duration: Duration::from_secs(duration_secs),
            severity: Severity::Warning,
            enabled: true,
            targets: vec!["log".to_string()],
        }
    }

    fn snapshot_at(secs: i64, cpu: f64) -> Snapshot {
        let mut snap = Snapshot::default();
        snap.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        snap.cpu_percent = cpu;
        snap
    }

    #[test]
    fn test_zero_duration_fires_immediately_and_once() {
        let mut evaluator = Evaluator::new(vec![cpu_rule(0)]);

        let alerts = evaluator.evaluate(&snapshot_at(0, 91.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, "cpu.usage > 80");
        assert_eq!(alerts[0].value, 91.0);
        assert!(!alerts[0].predicted);

        // still breaching, no duplicate alert
        assert!(evaluator.evaluate(&snapshot_at(300, 95.0)).is_empty());
    }

    #[test]
    fn test_duration_gating_requires_sustained_breach() {
        let mut evaluator = Evaluator::new(vec![cpu_rule(60)]);

        assert!(evaluator.evaluate(&snapshot_at(0, 91.0)).is_empty());
        assert!(evaluator.evaluate(&snapshot_at(30, 92.0)).is_empty());
        let alerts = evaluator.evaluate(&snapshot_at(60, 93.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].value, 93.0);
    }

    #[test]
    fn test_recovery_rearms_the_rule() {
        let mut evaluator = Evaluator::new(vec![cpu_rule(0)]);

        assert_eq!(evaluator.evaluate(&snapshot_at(0, 91.0)).len(), 1);
        assert!(evaluator.evaluate(&snapshot_at(300, 50.0)).is_empty());
        // new episode fires again
        assert_eq!(evaluator.evaluate(&snapshot_at(600, 91.0)).len(), 1);
    }

    #[test]
    fn test_dip_resets_duration_clock() {
        let mut evaluator = Evaluator::new(vec![cpu_rule(60)]);

        assert!(evaluator.evaluate(&snapshot_at(0, 91.0)).is_empty());
        // dip below threshold resets the episode
        assert!(evaluator.evaluate(&snapshot_at(30, 10.0)).is_empty());
        assert!(evaluator.evaluate(&snapshot_at(60, 91.0)).is_empty());
        assert!(evaluator.evaluate(&snapshot_at(90, 91.0)).is_empty());
        assert_eq!(evaluator.evaluate(&snapshot_at(120, 91.0)).len(), 1);
    }

    #[test]
    fn test_disabled_rules_are_ignored() {
        let mut rule = cpu_rule(0);
        rule.enabled = false;
        let mut evaluator = Evaluator::new(vec![rule]);
        assert!(evaluator.evaluate(&snapshot_at(0, 99.0)).is_empty());
    }
}
