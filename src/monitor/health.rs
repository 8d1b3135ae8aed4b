//! 健康监控器
//!
//! 记录每次采集的最终结果，维护各数据源的聚合统计、全局历史和告警日志，
//! 并支持快照的保存与恢复

use crate::monitor::alert::{
    Alert, AlertKind, AlertLevel, CONSECUTIVE_FAILS_THRESHOLD, LOW_SUCCESS_MIN_RUNS,
    LOW_SUCCESS_THRESHOLD, SLOW_RESPONSE_MIN_SAMPLES, SLOW_RESPONSE_THRESHOLD_MS,
};
use crate::monitor::record::{ErrorEntry, HealthLevel, HistoryEntry, RunOutcome, SourceHealthRecord};
use crate::config::GlobalConfig;
use crate::monitor::snapshot::{JsonFileStore, MonitorSnapshot, SnapshotStore};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// 全局历史记录容量
pub const HISTORY_CAPACITY: usize = 1000;
/// 告警日志容量
pub const ALERT_CAPACITY: usize = 100;
/// 状态报告中展示的最近告警数量
const RECENT_ALERTS_IN_STATUS: usize = 10;

/// 单个数据源的状态摘要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub name: String,
    /// 成功率百分比
    pub success_rate: u32,
    pub total_runs: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub total_items: u64,
    /// 平均耗时（毫秒，取整）
    pub avg_duration: u64,
    pub last_run: Option<DateTime<Local>>,
    pub last_success: Option<DateTime<Local>>,
    pub last_error: Option<ErrorEntry>,
    pub status: HealthLevel,
}

/// 监控状态报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    /// 格式化的运行时长
    pub uptime: String,
    pub sources_count: usize,
    pub sources: BTreeMap<String, SourceSummary>,
    pub recent_alerts: Vec<Alert>,
    pub overall_health: HealthLevel,
}

#[derive(Debug)]
struct MonitorState {
    sources: BTreeMap<String, SourceHealthRecord>,
    history: VecDeque<HistoryEntry>,
    alerts: VecDeque<Alert>,
    start_time: DateTime<Local>,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
            history: VecDeque::new(),
            alerts: VecDeque::new(),
            start_time: Local::now(),
        }
    }

    fn consecutive_failures(&self, source: &str) -> usize {
        self.history
            .iter()
            .rev()
            .filter(|entry| entry.source == source)
            .take_while(|entry| !entry.success)
            .count()
    }

    fn push_alert(&mut self, alert: Alert) {
        self.alerts.push_back(alert);
        while self.alerts.len() > ALERT_CAPACITY {
            self.alerts.pop_front();
        }
    }

    fn trim(&mut self) {
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
        while self.alerts.len() > ALERT_CAPACITY {
            self.alerts.pop_front();
        }
        for record in self.sources.values_mut() {
            record.trim();
        }
    }

    /// 按当前状态评估告警条件，每次满足条件都会重新触发
    fn evaluate_alerts(&self, source: &str, outcome: &RunOutcome) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let Some(record) = self.sources.get(source) else {
            return alerts;
        };

        if record.total_runs >= LOW_SUCCESS_MIN_RUNS {
            if let Some(ratio) = record.success_ratio() {
                if ratio < LOW_SUCCESS_THRESHOLD {
                    alerts.push(Alert::new(
                        source,
                        AlertKind::LowSuccessRate,
                        format!(
                            "成功率过低: {}% ({}/{})",
                            record.success_rate(),
                            record.success_count,
                            record.total_runs
                        ),
                    ));
                }
            }
        }

        if record.success_count >= SLOW_RESPONSE_MIN_SAMPLES
            && record.avg_duration > SLOW_RESPONSE_THRESHOLD_MS
        {
            alerts.push(Alert::new(
                source,
                AlertKind::SlowResponse,
                format!("平均耗时过长: {}ms", record.avg_duration.round() as u64),
            ));
        }

        let failures = self.consecutive_failures(source);
        if failures >= CONSECUTIVE_FAILS_THRESHOLD {
            alerts.push(Alert::new(
                source,
                AlertKind::ConsecutiveFails,
                format!(
                    "连续采集失败 {} 次: {}",
                    failures,
                    outcome.error.as_deref().unwrap_or("未知错误")
                ),
            ));
        }

        alerts
    }
}

/// 健康监控器
pub struct HealthMonitor {
    /// 监控状态
    state: RwLock<MonitorState>,
    /// 快照存储
    store: Option<Arc<dyn SnapshotStore>>,
}

impl HealthMonitor {
    /// 创建不带持久化的监控器
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MonitorState::new()),
            store: None,
        }
    }

    /// 设置快照存储
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 按全局配置创建，配置了快照路径时使用 JSON 文件存储
    pub fn from_config(global: &GlobalConfig) -> Self {
        match global.snapshot_path {
            Some(ref path) => Self::new().with_store(Arc::new(JsonFileStore::new(path))),
            None => Self::new(),
        }
    }

    /// 记录一次采集的最终结果
    ///
    /// # 参数
    /// * `source` - 数据源
    /// * `outcome` - 运行结果
    ///
    /// # 返回
    /// * `Vec<Alert>` - 本次记录触发的告警
    pub async fn record(&self, source: &str, outcome: RunOutcome) -> Vec<Alert> {
        let now = Local::now();
        let alerts = {
            let mut state = self.state.write().await;

            state
                .sources
                .entry(source.to_string())
                .or_insert_with(|| SourceHealthRecord::new(source))
                .apply(&outcome, now);

            state
                .history
                .push_back(HistoryEntry::from_outcome(source, &outcome, now));
            while state.history.len() > HISTORY_CAPACITY {
                state.history.pop_front();
            }

            let alerts = state.evaluate_alerts(source, &outcome);
            for alert in &alerts {
                state.push_alert(alert.clone());
            }
            alerts
        };

        debug!(
            "记录采集结果: {} success={} count={} duration={:?}",
            source, outcome.success, outcome.item_count, outcome.duration
        );
        for alert in &alerts {
            match alert.level {
                AlertLevel::Error => error!("[监控告警] {} {}: {}", alert.kind, source, alert.message),
                AlertLevel::Warning => warn!("[监控告警] {} {}: {}", alert.kind, source, alert.message),
            }
        }

        alerts
    }

    /// 数据源末尾的连续失败次数
    pub async fn consecutive_failures(&self, source: &str) -> usize {
        self.state.read().await.consecutive_failures(source)
    }

    /// 数据源的成功率百分比，未记录时为 0
    pub async fn success_rate(&self, source: &str) -> u32 {
        let state = self.state.read().await;
        state
            .sources
            .get(source)
            .map(SourceHealthRecord::success_rate)
            .unwrap_or(0)
    }

    /// 数据源健康分级
    pub async fn classify(&self, source: &str) -> HealthLevel {
        let state = self.state.read().await;
        state
            .sources
            .get(source)
            .map(SourceHealthRecord::classify)
            .unwrap_or(HealthLevel::Unknown)
    }

    /// 整体健康度
    pub async fn overall_health(&self) -> HealthLevel {
        let state = self.state.read().await;
        overall_of(state.sources.values())
    }

    /// 获取数据源的健康记录副本
    pub async fn record_of(&self, source: &str) -> Option<SourceHealthRecord> {
        self.state.read().await.sources.get(source).cloned()
    }

    /// 全部告警（按时间顺序）
    pub async fn alerts(&self) -> Vec<Alert> {
        self.state.read().await.alerts.iter().cloned().collect()
    }

    /// 未确认的告警
    pub async fn unacknowledged_alerts(&self) -> Vec<Alert> {
        let state = self.state.read().await;
        state
            .alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    /// 确认告警
    ///
    /// # 返回
    /// * `bool` - 告警是否存在
    pub async fn acknowledge(&self, alert_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// 历史记录数量
    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    /// 监控启动时间
    pub async fn start_time(&self) -> DateTime<Local> {
        self.state.read().await.start_time
    }

    /// 监控状态报告
    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.read().await;
        let uptime = (Local::now() - state.start_time)
            .to_std()
            .unwrap_or_default();

        let sources: BTreeMap<String, SourceSummary> = state
            .sources
            .iter()
            .map(|(name, record)| (name.clone(), summarize(record)))
            .collect();

        let skip = state.alerts.len().saturating_sub(RECENT_ALERTS_IN_STATUS);
        MonitorStatus {
            uptime: format_uptime(uptime),
            sources_count: sources.len(),
            sources,
            recent_alerts: state.alerts.iter().skip(skip).cloned().collect(),
            overall_health: overall_of(state.sources.values()),
        }
    }

    /// 导出完整快照
    pub async fn snapshot(&self) -> MonitorSnapshot {
        let state = self.state.read().await;
        MonitorSnapshot {
            sources: Some(state.sources.clone()),
            history: Some(state.history.iter().cloned().collect()),
            alerts: Some(state.alerts.iter().cloned().collect()),
            start_time: Some(state.start_time),
        }
    }

    /// 将快照合并到内存状态
    ///
    /// 快照中存在的字段整体替换对应状态，启动时间重置为当前时间
    pub async fn restore(&self, snapshot: MonitorSnapshot) {
        let mut state = self.state.write().await;
        if let Some(sources) = snapshot.sources {
            state.sources = sources;
        }
        if let Some(history) = snapshot.history {
            state.history = history.into();
        }
        if let Some(alerts) = snapshot.alerts {
            state.alerts = alerts.into();
        }
        state.trim();
        state.start_time = Local::now();
    }

    /// 保存快照到存储，失败只记录日志
    ///
    /// # 返回
    /// * `bool` - 是否保存成功
    pub async fn persist(&self) -> bool {
        let Some(store) = self.store.clone() else {
            return false;
        };

        let snapshot = self.snapshot().await;
        match store.save(&snapshot) {
            Ok(()) => {
                debug!("监控快照已保存");
                true
            }
            Err(e) => {
                error!("[监控] 保存数据失败: {}", e);
                false
            }
        }
    }

    /// 从存储加载快照，失败只记录日志
    ///
    /// # 返回
    /// * `bool` - 是否加载了快照
    pub async fn load(&self) -> bool {
        let Some(store) = self.store.clone() else {
            return false;
        };

        match store.load() {
            Ok(Some(snapshot)) => {
                self.restore(snapshot).await;
                info!("已加载监控快照");
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("[监控] 加载数据失败: {}", e);
                false
            }
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(record: &SourceHealthRecord) -> SourceSummary {
    SourceSummary {
        name: record.name.clone(),
        success_rate: record.success_rate(),
        total_runs: record.total_runs,
        success_count: record.success_count,
        fail_count: record.fail_count,
        total_items: record.total_items,
        avg_duration: record.avg_duration.round() as u64,
        last_run: record.last_run,
        last_success: record.last_success,
        last_error: record.last_error.clone(),
        status: record.classify(),
    }
}

fn overall_of<'a>(records: impl Iterator<Item = &'a SourceHealthRecord>) -> HealthLevel {
    let (mut critical, mut warning, mut healthy) = (0usize, 0usize, 0usize);
    for record in records {
        match record.classify() {
            HealthLevel::Critical => critical += 1,
            HealthLevel::Warning => warning += 1,
            HealthLevel::Healthy => healthy += 1,
            HealthLevel::Unknown => {}
        }
    }

    if critical > 0 {
        HealthLevel::Critical
    } else if warning > healthy {
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    }
}

/// 格式化运行时长，只保留最大的两个单位
pub fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}天{}小时", days, hours % 24)
    } else if hours > 0 {
        format!("{}小时{}分钟", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}分钟", minutes)
    } else {
        format!("{}秒", seconds)
    }
}
