//! 智能调度器集成测试

use async_trait::async_trait;
use collector_vitals::config::{CategoryConfig, Config, GlobalConfig};
use collector_vitals::error::{ProxyError, ScheduleError};
use collector_vitals::monitor::{HealthMonitor, JsonFileStore};
use collector_vitals::proxy::{ProxyEndpoint, ProxyHealth, ProxyPool, ProxyProbe};
use collector_vitals::runner::{collector_fn, CollectContext, CollectorMap, TaskRunner};
use collector_vitals::schedule::{
    CategoryTable, MaintenanceConfig, ManualCadenceTimer, Market, SmartScheduler,
    TokioCadenceTimer,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct RefuseProbe;

#[async_trait]
impl ProxyProbe for RefuseProbe {
    async fn probe(&self, endpoint: &ProxyEndpoint) -> Result<(), ProxyError> {
        Err(ProxyError::Unreachable {
            id: endpoint.id(),
            reason: "refused".to_string(),
        })
    }
}

fn runner(monitor: Arc<HealthMonitor>, pool: Arc<ProxyPool>) -> Arc<TaskRunner> {
    Arc::new(TaskRunner::new(monitor, pool).with_backoff_base(Duration::from_millis(1)))
}

fn every_second_category(sources: &[&str]) -> CategoryConfig {
    CategoryConfig {
        name: "fast".to_string(),
        sources: sources.iter().map(|s| s.to_string()).collect(),
        market: Market::Default,
        trading_hours: None,
        off_hours: None,
        schedule: Some("* * * * * *".to_string()),
        priority: 1,
        retry_count: 0,
        timeout_ms: 500,
    }
}

fn counting_collector(counter: Arc<AtomicUsize>) -> CollectorMap {
    let mut collectors: CollectorMap = HashMap::new();
    collectors.insert(
        "cls".to_string(),
        collector_fn(move |_ctx: CollectContext| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![json!({"title": "news"})])
            }
        }),
    );
    collectors
}

#[tokio::test]
async fn test_tokio_timer_fires_only_while_started() {
    let monitor = Arc::new(HealthMonitor::new());
    let pool = Arc::new(ProxyPool::new(Arc::new(RefuseProbe), Duration::from_millis(10)));
    let scheduler = SmartScheduler::new(
        runner(Arc::clone(&monitor), pool),
        Arc::new(TokioCadenceTimer::new()),
    );

    let counter = Arc::new(AtomicUsize::new(0));
    let table = CategoryTable::from_configs(&[every_second_category(&["cls"])]).unwrap();
    scheduler
        .initialize(table, counting_collector(Arc::clone(&counter)))
        .await
        .unwrap();

    // 初始化后未启动，不应触发
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let fired = counter.load(Ordering::SeqCst);
    assert!(fired >= 1, "expected at least one firing, got {}", fired);

    scheduler.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after_stop = counter.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), after_stop);

    assert!(monitor.record_of("cls").await.unwrap().success_count >= 1);
    let status = scheduler.status().await;
    assert!(!status.is_running);
    assert!(status.last_runs.contains_key("cls"));
}

#[tokio::test]
async fn test_default_categories_with_manual_timer() {
    let monitor = Arc::new(HealthMonitor::new());
    let pool = Arc::new(
        ProxyPool::new(Arc::new(RefuseProbe), Duration::from_millis(10))
            .with_sensitive_sources(["weibo"]),
    );
    let timer = Arc::new(ManualCadenceTimer::new());
    let scheduler = SmartScheduler::new(runner(Arc::clone(&monitor), pool), timer.clone());

    let config = Config::default();
    let table = CategoryTable::from_configs(&config.categories).unwrap();

    let mut collectors: CollectorMap = HashMap::new();
    for source in ["cls", "weibo", "yahoo", "cninfo"] {
        collectors.insert(
            source.to_string(),
            collector_fn(|_ctx: CollectContext| async move { Ok(vec![json!(1)]) }),
        );
    }
    assert_eq!(scheduler.initialize(table, collectors).await.unwrap(), 4);

    scheduler.start().await;
    assert_eq!(timer.fire_all().await, 4);
    assert_eq!(monitor.status().await.sources_count, 4);

    let tasks = scheduler.scheduled_tasks().await;
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.last_fired.is_some()));
    let weibo = tasks.iter().find(|t| t.source == "weibo").unwrap();
    assert_eq!(weibo.category.name, "social");
    assert!(weibo.category.cadence.is_market_aware());

    let report = scheduler.trigger_manual("yahoo").await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.attempts, 1);
    assert!(matches!(
        scheduler.trigger_manual("nobody").await,
        Err(ScheduleError::UnknownSource(_))
    ));

    scheduler.shutdown().await;
    assert_eq!(timer.registered().await, 0);
}

#[tokio::test]
async fn test_maintenance_snapshots_and_purges_proxies() {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("monitor.json");

    let monitor = Arc::new(
        HealthMonitor::new().with_store(Arc::new(JsonFileStore::new(&snapshot_path))),
    );
    let pool = Arc::new(ProxyPool::new(Arc::new(RefuseProbe), Duration::from_millis(10)));
    pool.add(ProxyEndpoint::new("http", "10.0.0.9", 3128)).await;
    for _ in 0..5 {
        pool.mark_fail("http://10.0.0.9:3128").await.unwrap();
    }
    pool.add(ProxyEndpoint::new("http", "10.0.0.8", 3128)).await;

    let global = GlobalConfig {
        snapshot_path: Some(snapshot_path.to_string_lossy().to_string()),
        snapshot_interval_seconds: Some(1),
        proxy_check_interval_seconds: Some(1),
        ..GlobalConfig::default()
    };
    let scheduler = SmartScheduler::new(
        runner(Arc::clone(&monitor), Arc::clone(&pool)),
        Arc::new(ManualCadenceTimer::new()),
    )
    .with_maintenance(MaintenanceConfig::from_config(&global));

    let counter = Arc::new(AtomicUsize::new(0));
    let table = CategoryTable::from_configs(&[every_second_category(&["cls"])]).unwrap();
    scheduler
        .initialize(table, counting_collector(counter))
        .await
        .unwrap();
    scheduler.trigger_manual("cls").await.unwrap();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(1600)).await;
    scheduler.stop().await;

    assert!(snapshot_path.exists());
    // 探测失败的代理只是不健康，原本失效的代理被移除
    assert_eq!(pool.len().await, 1);
    assert_eq!(
        pool.get("http://10.0.0.8:3128").await.unwrap().health,
        ProxyHealth::Unhealthy
    );

    let restored = HealthMonitor::new().with_store(Arc::new(JsonFileStore::new(&snapshot_path)));
    assert!(restored.load().await);
    assert_eq!(restored.record_of("cls").await.unwrap().success_count, 1);
}

#[tokio::test]
async fn test_from_config_wires_limits_and_restores_snapshot() {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("monitor.json");

    let previous = HealthMonitor::new().with_store(Arc::new(JsonFileStore::new(&snapshot_path)));
    previous
        .record("cls", collector_vitals::monitor::RunOutcome::success(3, Duration::from_millis(10)))
        .await;
    assert!(previous.persist().await);

    let config = Config {
        global: GlobalConfig {
            max_items: 5,
            backoff_base_ms: 1,
            proxies: Some("10.1.1.1:8080".to_string()),
            proxy_env_vars: vec![],
            snapshot_path: Some(snapshot_path.to_string_lossy().to_string()),
            ..GlobalConfig::default()
        },
        categories: vec![every_second_category(&["cls"])],
    };

    let timer = Arc::new(ManualCadenceTimer::new());
    let scheduler = SmartScheduler::from_config(&config, timer).await.unwrap();
    assert_eq!(scheduler.runner().proxies().len().await, 1);
    assert_eq!(
        scheduler
            .runner()
            .monitor()
            .record_of("cls")
            .await
            .unwrap()
            .success_count,
        1
    );

    let mut collectors: CollectorMap = HashMap::new();
    collectors.insert(
        "cls".to_string(),
        collector_fn(|ctx: CollectContext| async move {
            Ok((0..ctx.max_items).map(|i| json!(i)).collect())
        }),
    );
    let table = CategoryTable::from_configs(&config.categories).unwrap();
    scheduler.initialize(table, collectors).await.unwrap();

    let report = scheduler.trigger_manual("cls").await.unwrap();
    assert_eq!(report.item_count(), 5);
}
