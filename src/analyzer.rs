//! Trend analysis and resource-usage prediction
//!
//! Read-only statistics over the metric store: windowed summaries with a
//! least-squares trend direction, and linear extrapolation of future values
//! for the prediction job. Thin windows are a typed outcome, not an error.

use std::time::Duration;

use chrono::Utc;

use crate::error::StoreResult;
use crate::metrics::{AlertEvent, MetricCategory, Severity, TrendDirection, TrendReport};
use crate::store::MetricStore;

/// Slope band (per sample) inside which a trend counts as stable
const STABLE_SLOPE_BAND: f64 = 0.1;

/// Result of an analysis pass. A window with fewer than two samples cannot
/// support a fit; the caller decides whether that is worth logging.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Ready(TrendReport),
    InsufficientData { samples: usize },
}

/// Least-squares line over values indexed 0..n. Returns (slope, intercept);
/// slope is per sample step.
fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    let slope = if den == 0.0 { 0.0 } else { num / den };
    (slope, mean_y - slope * mean_x)
}

fn direction_of(slope: f64) -> TrendDirection {
    if slope > STABLE_SLOPE_BAND {
        TrendDirection::Increasing
    } else if slope < -STABLE_SLOPE_BAND {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// Summarize one metric over the trailing window ending now
pub fn analyze_trend(
    store: &dyn MetricStore,
    category: MetricCategory,
    metric: &str,
    window: Duration,
) -> StoreResult<AnalysisOutcome> {
    let end = Utc::now();
    let start = end - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(24));
    let points = store.query(category, metric, start, end)?;
    if points.len() < 2 {
        return Ok(AnalysisOutcome::InsufficientData { samples: points.len() });
    }

    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let (slope, _) = linear_fit(&values);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(AnalysisOutcome::Ready(TrendReport {
        category,
        metric: metric.to_string(),
        period_start: points[0].timestamp,
        period_end: points[points.len() - 1].timestamp,
        mean,
        min,
        max,
        current: values[values.len() - 1],
        samples: values.len(),
        direction: direction_of(slope),
        slope,
        forecast: None,
    }))
}

/// Fit the trailing window and extrapolate `horizon_points` future samples.
/// Percentage metrics clamp the forecast to [0, 100].
pub fn predict(
    store: &dyn MetricStore,
    category: MetricCategory,
    metric: &str,
    window: Duration,
    horizon_points: usize,
) -> StoreResult<AnalysisOutcome> {
    let outcome = analyze_trend(store, category, metric, window)?;
    let mut report = match outcome {
        AnalysisOutcome::Ready(report) => report,
        insufficient => return Ok(insufficient),
    };

    let (slope, intercept) = (report.slope, report.current - report.slope * (report.samples as f64 - 1.0));
    let n = report.samples as f64;
    let mut forecast = Vec::with_capacity(horizon_points);
    for step in 1..=horizon_points {
        let mut value = intercept + slope * (n - 1.0 + step as f64);
        if category.is_percentage() {
            value = value.clamp(0.0, 100.0);
        }
        forecast.push(value);
    }
    report.forecast = Some(forecast);
    Ok(AnalysisOutcome::Ready(report))
}

/// Secondary alert when a forecast peak crosses the predicted-breach
/// threshold. Dispatched through the same notifier path as live alerts.
pub fn predicted_breach(report: &TrendReport, threshold: f64) -> Option<AlertEvent> {
    let forecast = report.forecast.as_ref()?;
    let peak = forecast.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if peak <= threshold {
        return None;
    }
    Some(AlertEvent {
        rule: format!("{}.{} forecast > {}", report.category, report.metric, threshold),
        category: report.category,
        metric: report.metric.clone(),
        value: peak,
        threshold,
        severity: Severity::Warning,
        timestamp: Utc::now(),
        predicted: true,
        targets: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricPoint;
    use crate::store::MemoryStore;

    fn seed(store: &MemoryStore, metric: &str, values: &[f64]) {
        let base = Utc::now() - chrono::Duration::hours(1);
        let points: Vec<MetricPoint> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                MetricPoint::new(
                    base + chrono::Duration::minutes(i as i64),
                    MetricCategory::Cpu,
                    metric,
                    *v,
                )
            })
            .collect();
        store.insert(&points).unwrap();
    }

    #[test]
    fn test_linear_fit_recovers_line() {
        let (slope, intercept) = linear_fit(&[10.0, 12.0, 14.0, 16.0]);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 10.0).abs() < 1e-9);

        let (slope, _) = linear_fit(&[5.0, 5.0, 5.0]);
        assert_eq!(slope, 0.0);
    }

    #[test]
    fn test_insufficient_data_is_typed_not_an_error() {
        let store = MemoryStore::new();
        let outcome = analyze_trend(&store, MetricCategory::Cpu, "usage", Duration::from_secs(3600)).unwrap();
        assert!(matches!(outcome, AnalysisOutcome::InsufficientData { samples: 0 }));

        seed(&store, "usage", &[42.0]);
        let outcome = analyze_trend(&store, MetricCategory::Cpu, "usage", Duration::from_secs(7200)).unwrap();
        assert!(matches!(outcome, AnalysisOutcome::InsufficientData { samples: 1 }));
    }

    #[test]
    fn test_trend_statistics_and_direction() {
        let store = MemoryStore::new();
        seed(&store, "usage", &[10.0, 20.0, 30.0, 40.0]);

        let outcome = analyze_trend(&store, MetricCategory::Cpu, "usage", Duration::from_secs(7200)).unwrap();
        let AnalysisOutcome::Ready(report) = outcome else {
            panic!("expected a report");
        };
        assert_eq!(report.samples, 4);
        assert_eq!(report.mean, 25.0);
        assert_eq!(report.min, 10.0);
        assert_eq!(report.max, 40.0);
        assert_eq!(report.current, 40.0);
        assert_eq!(report.direction, TrendDirection::Increasing);
        assert!((report.slope - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_slope_is_stable() {
        let store = MemoryStore::new();
        seed(&store, "usage", &[50.0, 50.05, 50.1, 50.15]);

        let outcome = analyze_trend(&store, MetricCategory::Cpu, "usage", Duration::from_secs(7200)).unwrap();
        let AnalysisOutcome::Ready(report) = outcome else {
            panic!("expected a report");
        };
        assert_eq!(report.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_forecast_clamps_percentage_metrics() {
        let store = MemoryStore::new();
        // steep climb; unclamped extrapolation would exceed 100
        seed(&store, "usage", &[60.0, 70.0, 80.0, 90.0]);

        let outcome = predict(&store, MetricCategory::Cpu, "usage", Duration::from_secs(7200), 5).unwrap();
        let AnalysisOutcome::Ready(report) = outcome else {
            panic!("expected a report");
        };
        let forecast = report.forecast.as_ref().unwrap();
        assert_eq!(forecast.len(), 5);
        assert!(forecast.iter().all(|v| *v >= 0.0 && *v <= 100.0));
        assert_eq!(*forecast.last().unwrap(), 100.0);
    }

    #[test]
    fn test_predicted_breach_alert() {
        let store = MemoryStore::new();
        seed(&store, "usage", &[60.0, 70.0, 80.0, 90.0]);

        let outcome = predict(&store, MetricCategory::Cpu, "usage", Duration::from_secs(7200), 5).unwrap();
        let AnalysisOutcome::Ready(report) = outcome else {
            panic!("expected a report");
        };
        let alert = predicted_breach(&report, 90.0).unwrap();
        assert!(alert.predicted);
        assert!(alert.value > 90.0 || alert.value == 100.0);

        assert!(predicted_breach(&report, 150.0).is_none());
    }

    #[test]
    fn test_flat_forecast_stays_flat() {
        let store = MemoryStore::new();
        seed(&store, "usage", &[55.0, 55.0, 55.0, 55.0]);

        let outcome = predict(&store, MetricCategory::Cpu, "usage", Duration::from_secs(7200), 3).unwrap();
        let AnalysisOutcome::Ready(report) = outcome else {
            panic!("expected a report");
        };
        assert!(report.forecast.unwrap().iter().all(|v| (*v - 55.0).abs() < 1e-9));
    }
}
