//! 健康监控集成测试
//!
//! 覆盖容量上限、告警规则和快照持久化

use collector_vitals::monitor::{
    AlertKind, AlertLevel, HealthLevel, HealthMonitor, JsonFileStore, RunOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn ok(items: usize) -> RunOutcome {
    RunOutcome::success(items, Duration::from_millis(120))
}

fn fail(message: &str) -> RunOutcome {
    RunOutcome::failure(message, Duration::from_millis(80))
}

#[tokio::test]
async fn test_history_alerts_and_recent_errors_are_capped() {
    let monitor = HealthMonitor::new();

    for i in 0..1200 {
        monitor.record(&format!("source-{}", i % 7), ok(1)).await;
    }
    assert_eq!(monitor.history_len().await, 1000);

    for _ in 0..150 {
        monitor.record("broken", fail("HTTP 502")).await;
    }
    assert_eq!(monitor.alerts().await.len(), 100);
    assert_eq!(monitor.history_len().await, 1000);

    for i in 0..20 {
        monitor.record("flaky", fail(&format!("error {}", i))).await;
    }
    let record = monitor.record_of("flaky").await.unwrap();
    assert_eq!(record.recent_errors.len(), 10);
    assert_eq!(record.recent_errors.back().unwrap().message, "error 19");
    assert_eq!(record.fail_count, 20);
}

#[tokio::test]
async fn test_consecutive_failures_raise_error_alert() {
    let monitor = HealthMonitor::new();

    assert!(monitor.record("cls", fail("timeout")).await.is_empty());
    assert!(monitor.record("cls", fail("timeout")).await.is_empty());

    let alerts = monitor.record("cls", fail("HTTP 503")).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::ConsecutiveFails);
    assert_eq!(alerts[0].level, AlertLevel::Error);
    assert!(alerts[0].message.contains("连续采集失败 3 次"));
    assert!(alerts[0].message.contains("HTTP 503"));

    // 成功后计数清零
    monitor.record("cls", ok(5)).await;
    assert_eq!(monitor.consecutive_failures("cls").await, 0);

    // 第5次运行成功率 20%，只触发成功率告警
    let alerts = monitor.record("cls", fail("timeout")).await;
    assert_eq!(monitor.consecutive_failures("cls").await, 1);
    assert!(!alerts.iter().any(|a| a.kind == AlertKind::ConsecutiveFails));
    assert!(alerts.iter().any(|a| a.kind == AlertKind::LowSuccessRate));
}

#[tokio::test]
async fn test_other_sources_do_not_break_failure_streak() {
    let monitor = HealthMonitor::new();

    monitor.record("weibo", fail("blocked")).await;
    monitor.record("cls", ok(3)).await;
    monitor.record("weibo", fail("blocked")).await;
    monitor.record("jin10", ok(3)).await;

    let alerts = monitor.record("weibo", fail("blocked")).await;
    assert!(alerts.iter().any(|a| a.kind == AlertKind::ConsecutiveFails));
    assert_eq!(monitor.consecutive_failures("weibo").await, 3);
}

#[tokio::test]
async fn test_low_success_rate_and_classification() {
    let monitor = HealthMonitor::new();

    for _ in 0..3 {
        monitor.record("guba", ok(2)).await;
    }
    monitor.record("guba", fail("parse error")).await;
    let alerts = monitor.record("guba", fail("parse error")).await;

    // 3/5 = 60%
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::LowSuccessRate);
    assert_eq!(alerts[0].level, AlertLevel::Warning);
    assert_eq!(monitor.success_rate("guba").await, 60);
    assert_eq!(monitor.classify("guba").await, HealthLevel::Critical);
    assert_eq!(monitor.classify("unknown").await, HealthLevel::Unknown);
    assert_eq!(monitor.overall_health().await, HealthLevel::Critical);
}

#[tokio::test]
async fn test_slow_response_alert() {
    let monitor = HealthMonitor::new();
    let slow = RunOutcome::success(1, Duration::from_secs(31));

    assert!(monitor.record("toutiao", slow.clone()).await.is_empty());
    assert!(monitor.record("toutiao", slow.clone()).await.is_empty());
    let alerts = monitor.record("toutiao", slow).await;

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::SlowResponse);
    assert!(alerts[0].message.contains("31000ms"));
}

#[tokio::test]
async fn test_acknowledge_alert() {
    let monitor = HealthMonitor::new();
    for _ in 0..3 {
        monitor.record("stcn", fail("boom")).await;
    }

    let open = monitor.unacknowledged_alerts().await;
    assert_eq!(open.len(), 1);
    assert!(monitor.acknowledge(&open[0].id).await);
    assert!(!monitor.acknowledge("no-such-alert").await);
    assert!(monitor.unacknowledged_alerts().await.is_empty());
    assert_eq!(monitor.alerts().await.len(), 1);
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("monitor.json");

    let monitor = HealthMonitor::new().with_store(Arc::new(JsonFileStore::new(&path)));
    monitor.record("cls", ok(10)).await;
    for _ in 0..3 {
        monitor.record("weibo", fail("captcha")).await;
    }
    assert!(monitor.persist().await);
    assert!(path.exists());

    let restarted = HealthMonitor::new().with_store(Arc::new(JsonFileStore::new(&path)));
    assert!(restarted.load().await);

    let cls = restarted.record_of("cls").await.unwrap();
    assert_eq!(cls.success_count, 1);
    assert_eq!(cls.total_items, 10);
    assert_eq!(restarted.history_len().await, 4);
    assert_eq!(restarted.alerts().await.len(), 1);
    assert_eq!(restarted.consecutive_failures("weibo").await, 3);

    let status = restarted.status().await;
    assert_eq!(status.sources_count, 2);
    assert_eq!(status.sources["weibo"].status, HealthLevel::Critical);
    assert_eq!(status.recent_alerts.len(), 1);
}

#[tokio::test]
async fn test_missing_or_corrupt_snapshot_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("monitor.json");

    let monitor = HealthMonitor::new().with_store(Arc::new(JsonFileStore::new(&path)));
    assert!(!monitor.load().await);

    std::fs::write(&path, "{ not json").unwrap();
    assert!(!monitor.load().await);

    // 加载失败不影响正常记录
    monitor.record("cls", ok(1)).await;
    assert_eq!(monitor.history_len().await, 1);
}
