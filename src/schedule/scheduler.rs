//! 智能调度器
//!
//! 为每个已注册采集器的数据源注册周期任务，按市场交易时段选择频率，
//! 并提供手动触发、状态查询和被动健康检查

use crate::config::{Config, GlobalConfig};
use crate::error::ScheduleError;
use crate::monitor::{HealthMonitor, RunOutcome};
use crate::proxy::ProxyPool;
use crate::runner::{CollectContext, Collector, CollectorMap, RetryPolicy, RunReport, TaskRunner};
use crate::schedule::cadence::CronCadence;
use crate::schedule::market::Market;
use crate::schedule::registry::{CategoryDescriptor, CategoryTable};
use crate::schedule::timer::{CadenceTimer, TimerCallback, TimerHandle};
use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 已注册的周期任务
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// 数据源
    pub source: String,
    /// 所属分类
    pub category: Arc<CategoryDescriptor>,
    /// 定时器注册句柄
    pub handle: TimerHandle,
    /// 最近触发时间
    pub last_fired: Option<DateTime<Local>>,
}

/// 调度器状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// 是否运行中
    pub is_running: bool,
    /// 任务数量
    pub task_count: usize,
    /// 各市场当前是否处于交易时段
    pub is_trading_hours: BTreeMap<String, bool>,
    /// 分类名称
    pub categories: Vec<String>,
    /// 最近一次触发时间
    pub last_run: Option<DateTime<Local>>,
    /// 各数据源最近触发时间
    pub last_runs: BTreeMap<String, DateTime<Local>>,
}

/// 被动健康检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Empty,
    Error,
    /// 数据源正在采集中，跳过
    Busy,
}

/// 单个采集器的健康检查结果
#[derive(Debug, Clone, Serialize)]
pub struct CollectorCheck {
    pub status: CheckStatus,
    /// 采集器自带的状态信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// 耗时（毫秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 周期维护配置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceConfig {
    /// 监控快照间隔
    pub snapshot_interval: Option<Duration>,
    /// 代理巡检间隔
    pub proxy_check_interval: Option<Duration>,
}

impl MaintenanceConfig {
    pub fn from_config(global: &GlobalConfig) -> Self {
        Self {
            snapshot_interval: global
                .snapshot_path
                .as_ref()
                .and(global.snapshot_interval_seconds)
                .map(Duration::from_secs),
            proxy_check_interval: global.proxy_check_interval_seconds.map(Duration::from_secs),
        }
    }
}

/// 同一数据源同时只允许一次采集
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    source: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, source: &str) -> Option<Self> {
        let mut sources = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !sources.insert(source.to_string()) {
            return None;
        }
        Some(Self {
            set,
            source: source.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut sources = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        sources.remove(&self.source);
    }
}

/// 定时回调与手动触发共享的状态
struct SchedulerShared {
    runner: Arc<TaskRunner>,
    in_flight: Mutex<HashSet<String>>,
    last_runs: RwLock<HashMap<String, DateTime<Local>>>,
    last_run: RwLock<Option<DateTime<Local>>>,
}

impl SchedulerShared {
    /// 执行一次采集；数据源仍在采集中时返回 `None`
    async fn fire(
        &self,
        source: &str,
        collector: Arc<dyn Collector>,
        policy: RetryPolicy,
    ) -> Option<RunReport> {
        let _guard = InFlightGuard::acquire(&self.in_flight, source)?;

        let now = Local::now();
        self.last_runs.write().await.insert(source.to_string(), now);
        *self.last_run.write().await = Some(now);

        Some(self.runner.run(source, collector, &policy).await)
    }

    fn is_in_flight(&self, source: &str) -> bool {
        let sources = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        sources.contains(source)
    }
}

/// 智能调度器
pub struct SmartScheduler {
    /// 定时器
    timer: Arc<dyn CadenceTimer>,
    /// 共享状态
    shared: Arc<SchedulerShared>,
    /// 分类表
    table: RwLock<CategoryTable>,
    /// 采集器
    collectors: RwLock<CollectorMap>,
    /// 已注册任务
    tasks: RwLock<BTreeMap<String, ScheduledTask>>,
    /// 是否运行中
    running: AtomicBool,
    /// 周期维护配置
    maintenance: MaintenanceConfig,
    /// 周期维护任务
    maintenance_tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SmartScheduler {
    /// 创建新的调度器
    ///
    /// # 参数
    /// * `runner` - 任务执行器
    /// * `timer` - 定时器实现
    pub fn new(runner: Arc<TaskRunner>, timer: Arc<dyn CadenceTimer>) -> Self {
        Self {
            timer,
            shared: Arc::new(SchedulerShared {
                runner,
                in_flight: Mutex::new(HashSet::new()),
                last_runs: RwLock::new(HashMap::new()),
                last_run: RwLock::new(None),
            }),
            table: RwLock::new(CategoryTable::default()),
            collectors: RwLock::new(HashMap::new()),
            tasks: RwLock::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            maintenance: MaintenanceConfig::default(),
            maintenance_tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// 按配置组装调度器
    ///
    /// 创建健康监控器（并加载已有快照）、代理池和执行器，启用配置中的周期维护；
    /// 分类表和采集器仍需通过 `initialize` 注册
    pub async fn from_config(
        config: &Config,
        timer: Arc<dyn CadenceTimer>,
    ) -> crate::error::Result<Self> {
        let monitor = Arc::new(HealthMonitor::from_config(&config.global));
        monitor.load().await;
        let proxies = Arc::new(ProxyPool::from_config(&config.global).await);
        let runner = TaskRunner::from_config(monitor, proxies, &config.global)?;

        Ok(Self::new(Arc::new(runner), timer)
            .with_maintenance(MaintenanceConfig::from_config(&config.global)))
    }

    /// 设置周期维护
    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    /// 任务执行器
    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.shared.runner
    }

    /// 初始化调度任务
    ///
    /// 先停用并注销之前的全部任务，再为每个有采集器的数据源注册周期任务；
    /// 没有采集器的数据源记录警告后跳过。初始化后需要调用 `start` 激活
    ///
    /// # 参数
    /// * `table` - 分类表
    /// * `collectors` - 数据源到采集器的映射
    ///
    /// # 返回
    /// * `Result<usize, ScheduleError>` - 注册的任务数量
    pub async fn initialize(
        &self,
        table: CategoryTable,
        collectors: CollectorMap,
    ) -> Result<usize, ScheduleError> {
        self.stop().await;
        self.clear_tasks().await;

        let mut tasks: BTreeMap<String, ScheduledTask> = BTreeMap::new();
        for (source, category) in table.sources() {
            let Some(collector) = collectors.get(&source) else {
                warn!("[调度] 数据源 {} 没有可用的采集器，跳过", source);
                continue;
            };

            let callback = self.callback_for(&source, Arc::clone(collector), &category);
            let handle = match self.timer.register(category.cadence.clone(), callback).await {
                Ok(handle) => handle,
                Err(e) => {
                    for task in tasks.values() {
                        self.timer.unregister(task.handle).await;
                    }
                    return Err(e);
                }
            };

            debug!(
                "[调度] 注册 {} ({}): {}",
                source,
                category.name,
                category.cadence.resolve(&Local::now())
            );
            tasks.insert(
                source.clone(),
                ScheduledTask {
                    source,
                    category,
                    handle,
                    last_fired: None,
                },
            );
        }

        let count = tasks.len();
        *self.tasks.write().await = tasks;
        *self.table.write().await = table;
        *self.collectors.write().await = collectors;

        info!("[调度] 智能调度器初始化完成，共 {} 个任务", count);
        Ok(count)
    }

    fn callback_for(
        &self,
        source: &str,
        collector: Arc<dyn Collector>,
        category: &CategoryDescriptor,
    ) -> TimerCallback {
        let shared = Arc::clone(&self.shared);
        let source = source.to_string();
        let policy = RetryPolicy::from_category(category);

        Arc::new(move || {
            let shared = Arc::clone(&shared);
            let source = source.clone();
            let collector = Arc::clone(&collector);
            Box::pin(async move {
                if shared.fire(&source, collector, policy).await.is_none() {
                    warn!("[调度] {} 上一次采集尚未完成，跳过本次触发", source);
                }
            })
        })
    }

    async fn clear_tasks(&self) {
        let old: Vec<ScheduledTask> = {
            let mut tasks = self.tasks.write().await;
            std::mem::take(&mut *tasks).into_values().collect()
        };
        for task in old {
            self.timer.unregister(task.handle).await;
        }
    }

    /// 计算数据源在给定时刻生效的调度表达式
    pub async fn resolve_cadence<Tz: TimeZone>(
        &self,
        source: &str,
        now: &DateTime<Tz>,
    ) -> Result<CronCadence, ScheduleError> {
        let table = self.table.read().await;
        let category = table
            .lookup(source)
            .ok_or_else(|| ScheduleError::UnknownSource(source.to_string()))?;
        Ok(category.cadence.resolve(now).clone())
    }

    /// 激活全部周期任务
    pub async fn start(&self) {
        self.timer.start().await;
        self.running.store(true, Ordering::SeqCst);
        self.spawn_maintenance().await;

        let count = self.tasks.read().await.len();
        info!("[调度] 智能调度器已启动，{} 个任务", count);
    }

    /// 停用全部周期任务，保留注册
    pub async fn stop(&self) {
        self.timer.stop().await;
        let was_running = self.running.swap(false, Ordering::SeqCst);

        let mut handles = self.maintenance_tasks.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }

        if was_running {
            info!("[调度] 智能调度器已停止");
        }
    }

    /// 停止调度、注销任务并取消进行中的采集
    pub async fn shutdown(&self) {
        self.stop().await;
        self.clear_tasks().await;
        self.shared.runner.shutdown();
    }

    /// 是否运行中
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn spawn_maintenance(&self) {
        let mut handles = self.maintenance_tasks.lock().await;
        if !handles.is_empty() {
            return;
        }

        if let Some(period) = self.maintenance.snapshot_interval {
            let monitor = Arc::clone(self.shared.runner.monitor());
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    monitor.persist().await;
                }
            }));
        }

        if let Some(period) = self.maintenance.proxy_check_interval {
            let proxies = Arc::clone(self.shared.runner.proxies());
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    // 探测会重置状态，先移除上一周期累计失效的代理
                    proxies.remove_dead().await;
                    if proxies.is_empty().await {
                        continue;
                    }
                    proxies.probe_all().await;
                }
            }));
        }
    }

    /// 立即为数据源执行一次采集，使用其分类的重试策略
    ///
    /// # 返回
    /// * `Result<RunReport, ScheduleError>` - 数据源未注册采集器或正在采集中时返回错误
    pub async fn trigger_manual(&self, source: &str) -> Result<RunReport, ScheduleError> {
        let policy = {
            let table = self.table.read().await;
            table
                .lookup(source)
                .map(|category| RetryPolicy::from_category(&category))
                .unwrap_or_default()
        };
        self.trigger_manual_with(source, policy).await
    }

    /// 使用指定策略立即执行一次采集
    pub async fn trigger_manual_with(
        &self,
        source: &str,
        policy: RetryPolicy,
    ) -> Result<RunReport, ScheduleError> {
        let collector = self
            .collectors
            .read()
            .await
            .get(source)
            .cloned()
            .ok_or_else(|| ScheduleError::UnknownSource(source.to_string()))?;

        info!("[调度] 手动触发: {}", source);
        self.shared
            .fire(source, collector, policy)
            .await
            .ok_or_else(|| ScheduleError::SourceBusy(source.to_string()))
    }

    /// 数据源是否有进行中的采集
    pub fn is_in_flight(&self, source: &str) -> bool {
        self.shared.is_in_flight(source)
    }

    /// 已注册的任务（按数据源排序）
    pub async fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
        let last_runs = self.shared.last_runs.read().await;
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .map(|task| ScheduledTask {
                last_fired: last_runs.get(&task.source).copied(),
                ..task.clone()
            })
            .collect()
    }

    /// 调度器状态
    pub async fn status(&self) -> SchedulerStatus {
        let now = Local::now();
        let is_trading_hours = Market::REPORTED
            .iter()
            .map(|market| (market.to_string(), market.is_trading_hours(&now)))
            .collect();

        SchedulerStatus {
            is_running: self.is_running(),
            task_count: self.tasks.read().await.len(),
            is_trading_hours,
            categories: self.table.read().await.category_names(),
            last_run: *self.shared.last_run.read().await,
            last_runs: self
                .shared
                .last_runs
                .read()
                .await
                .iter()
                .map(|(source, time)| (source.clone(), *time))
                .collect(),
        }
    }

    /// 被动健康检查
    ///
    /// 支持状态查询的采集器直接返回状态；其余采集器以最大条目数 1 调用一次，
    /// 结果记录到健康监控器。正在采集中的数据源不会再次调用，标记为 `busy`
    pub async fn health_check(&self) -> BTreeMap<String, CollectorCheck> {
        info!("[监控] 开始健康检查...");
        let collectors: BTreeMap<String, Arc<dyn Collector>> = self
            .collectors
            .read()
            .await
            .iter()
            .map(|(source, collector)| (source.clone(), Arc::clone(collector)))
            .collect();

        let mut results = BTreeMap::new();
        for (source, collector) in collectors {
            if let Some(data) = collector.status() {
                results.insert(
                    source,
                    CollectorCheck {
                        status: CheckStatus::Ok,
                        data: Some(data),
                        duration: None,
                        count: None,
                        error: None,
                    },
                );
                continue;
            }

            let Some(_guard) = InFlightGuard::acquire(&self.shared.in_flight, &source) else {
                warn!("[监控] {} 正在采集中，跳过健康检查", source);
                results.insert(
                    source,
                    CollectorCheck {
                        status: CheckStatus::Busy,
                        data: None,
                        duration: None,
                        count: None,
                        error: None,
                    },
                );
                continue;
            };

            let timeout = {
                let table = self.table.read().await;
                table
                    .lookup(&source)
                    .map(|c| c.timeout)
                    .unwrap_or_else(|| RetryPolicy::default().timeout)
            };
            let check = self.probe_collector(&source, collector, timeout).await;
            results.insert(source, check);
        }

        info!("[监控] 健康检查完成");
        results
    }

    async fn probe_collector(
        &self,
        source: &str,
        collector: Arc<dyn Collector>,
        timeout: Duration,
    ) -> CollectorCheck {
        let ctx = CollectContext::new(1);
        let token = ctx.cancel.clone();
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, collector.collect(ctx)).await;
        token.cancel();
        let duration = started.elapsed();
        let monitor = self.shared.runner.monitor();

        match result {
            Ok(Ok(items)) => {
                let count = items.len();
                let outcome = if count > 0 {
                    RunOutcome::success(count, duration)
                } else {
                    RunOutcome::failure("未采集到数据", duration)
                };
                monitor.record(source, outcome).await;
                CollectorCheck {
                    status: if count > 0 {
                        CheckStatus::Ok
                    } else {
                        CheckStatus::Empty
                    },
                    data: None,
                    duration: Some(duration.as_millis() as u64),
                    count: Some(count),
                    error: None,
                }
            }
            Ok(Err(e)) => self.failed_check(source, e.to_string(), duration).await,
            Err(_) => {
                let message = format!("健康检查超时 ({}ms)", timeout.as_millis());
                self.failed_check(source, message, duration).await
            }
        }
    }

    async fn failed_check(&self, source: &str, message: String, duration: Duration) -> CollectorCheck {
        error!("[监控] {} 健康检查失败: {}", source, message);
        self.shared
            .runner
            .monitor()
            .record(source, RunOutcome::failure(message.clone(), duration))
            .await;
        CollectorCheck {
            status: CheckStatus::Error,
            data: None,
            duration: None,
            count: None,
            error: Some(message),
        }
    }
}

impl Drop for SmartScheduler {
    fn drop(&mut self) {
        for handle in self.maintenance_tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}
