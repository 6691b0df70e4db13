//! End-to-end wiring tests for the monitor service

use std::time::Duration;

use chrono::Utc;
use hostwatch::config::{MonitorConfig, StoreKind, ThresholdRuleConfig};
use hostwatch::metrics::{CompareOp, MetricCategory, Severity};
use hostwatch::service::{MonitorService, ServiceStatus};
use hostwatch::store::{JsonlStore, MetricStore};

fn jsonl_config(base: &std::path::Path) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.storage.kind = StoreKind::Jsonl;
    config.storage.base_path = base.to_path_buf();
    config
}

#[tokio::test]
async fn test_collection_cycles_persist_to_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let service = MonitorService::new(jsonl_config(dir.path())).unwrap();

    service.trigger_collection().await.unwrap();
    service.trigger_collection().await.unwrap();

    let state = service.state();
    assert_eq!(state.cycles_completed, 2);
    assert!(state.last_snapshot_at.is_some());

    // read back through a fresh store handle on the same directory
    let store = JsonlStore::new(dir.path()).unwrap();
    let start = Utc::now() - chrono::Duration::minutes(5);
    let end = Utc::now() + chrono::Duration::minutes(1);
    let points = store.query(MetricCategory::Cpu, "usage", start, end).unwrap();
    assert_eq!(points.len(), 2);
    assert!(points[0].timestamp <= points[1].timestamp);

    let memory = store.query(MetricCategory::Memory, "usage", start, end).unwrap();
    assert_eq!(memory.len(), 2);
    assert!(memory.iter().all(|p| p.value >= 0.0 && p.value <= 100.0));
}

#[tokio::test]
async fn test_breaching_threshold_emits_one_alert_per_episode() {
    let mut config = MonitorConfig::default();
    config.thresholds.clear();
    // cpu usage >= 0 always holds, so the first cycle breaches immediately
    config.thresholds.insert(
        "always_on".to_string(),
        ThresholdRuleConfig {
            category: MetricCategory::Cpu,
            metric: "usage".to_string(),
            op: CompareOp::Ge,
            value: 0.0,
            duration_seconds: 0,
            severity: Severity::Critical,
            enabled: true,
            targets: vec!["log".to_string()],
        },
    );
    let service = MonitorService::new(config).unwrap();

    service.trigger_collection().await.unwrap();
    assert_eq!(service.state().alerts_emitted, 1);

    // breach continues; edge-triggered, no second alert
    service.trigger_collection().await.unwrap();
    assert_eq!(service.state().alerts_emitted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_collection_runs_and_stops_cleanly() {
    let mut config = MonitorConfig::default();
    config.collection_interval_seconds = 1;

    let mut service = MonitorService::new(config).unwrap();
    service.start().unwrap();
    assert_eq!(service.state().status, ServiceStatus::Running);

    tokio::time::sleep(Duration::from_secs(3)).await;
    service.stop().await;

    let state = service.state();
    assert_eq!(state.status, ServiceStatus::Stopped);
    assert!(state.cycles_completed >= 1);
    assert!(state.last_snapshot_at.is_some());
}

#[tokio::test]
async fn test_snapshot_exposes_top_processes_and_system_info() {
    let mut config = MonitorConfig::default();
    config.top_process_count = 3;
    let service = MonitorService::new(config).unwrap();

    service.trigger_collection().await.unwrap();

    let snapshot = service.latest_snapshot().unwrap();
    assert!(snapshot.top_processes.len() <= 3);
    assert!(snapshot.system.cpu_count > 0);
    // first cycle has no rate baseline
    assert_eq!(snapshot.network.bytes_sent_speed, 0.0);
}
