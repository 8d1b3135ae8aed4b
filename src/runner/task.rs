//! 采集任务执行器
//!
//! 对单次逻辑调用执行超时控制、有限重试和线性退避，只把最终结果记录到监控器

use crate::config::GlobalConfig;
use crate::error::{CollectError, NotificationError};
use crate::monitor::{Alert, HealthMonitor, RunOutcome};
use crate::notification::{FeishuSender, NotificationSender};
use crate::proxy::ProxyPool;
use crate::runner::collector::{CollectContext, CollectedItem, Collector};
use crate::schedule::registry::CategoryDescriptor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 默认退避基数
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(2000);
/// 默认最大条目数
pub const DEFAULT_MAX_ITEMS: usize = 30;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 失败后的最大重试次数
    pub retry_count: u32,
    /// 单次尝试超时
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, timeout: Duration) -> Self {
        Self {
            retry_count,
            timeout,
        }
    }

    /// 使用分类的重试次数与超时
    pub fn from_category(category: &CategoryDescriptor) -> Self {
        Self::new(category.retry_count, category.timeout)
    }

    /// 最大尝试次数
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    /// 手动触发的默认策略：重试1次，超时15秒
    fn default() -> Self {
        Self::new(1, Duration::from_millis(15_000))
    }
}

/// 单次逻辑调用的结果
#[derive(Debug, Clone)]
pub struct RunReport {
    /// 数据源
    pub source: String,
    /// 采集到的条目，失败时为空
    pub items: Option<Vec<CollectedItem>>,
    /// 实际尝试次数
    pub attempts: u32,
    /// 最后一次尝试的耗时
    pub duration: Duration,
    /// 最后一次尝试的错误
    pub error: Option<CollectError>,
    /// 使用的代理
    pub proxy: Option<String>,
    /// 记录结果时触发的告警
    pub alerts: Vec<Alert>,
}

impl RunReport {
    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.items.is_some()
    }

    /// 条目数量
    pub fn item_count(&self) -> usize {
        self.items.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// 采集任务执行器
pub struct TaskRunner {
    /// 健康监控器
    monitor: Arc<HealthMonitor>,
    /// 代理池
    proxies: Arc<ProxyPool>,
    /// 告警通知
    notifier: Option<Arc<dyn NotificationSender>>,
    /// 退避基数
    backoff_base: Duration,
    /// 传给采集器的最大条目数
    max_items: usize,
    /// 关闭信号
    shutdown: CancellationToken,
}

impl TaskRunner {
    /// 创建新的执行器
    ///
    /// # 参数
    /// * `monitor` - 健康监控器
    /// * `proxies` - 代理池
    pub fn new(monitor: Arc<HealthMonitor>, proxies: Arc<ProxyPool>) -> Self {
        Self {
            monitor,
            proxies,
            notifier: None,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_items: DEFAULT_MAX_ITEMS,
            shutdown: CancellationToken::new(),
        }
    }

    /// 按全局配置创建，配置了飞书 webhook 时启用告警通知
    ///
    /// # 返回
    /// * `Result<Self, NotificationError>` - webhook 或模板无效时返回错误
    pub fn from_config(
        monitor: Arc<HealthMonitor>,
        proxies: Arc<ProxyPool>,
        global: &GlobalConfig,
    ) -> Result<Self, NotificationError> {
        let runner = Self::new(monitor, proxies)
            .with_backoff_base(Duration::from_millis(global.backoff_base_ms))
            .with_max_items(global.max_items);

        match global.feishu_webhook_url {
            Some(ref url) => {
                let sender = FeishuSender::new(url.as_str(), global.alert_template.as_deref())?;
                Ok(runner.with_notifier(Arc::new(sender)))
            }
            None => Ok(runner),
        }
    }

    /// 设置告警通知
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSender>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// 设置退避基数
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// 设置最大条目数
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// 健康监控器
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// 代理池
    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    /// 关闭执行器，进行中的采集会收到取消信号
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// 执行一次逻辑调用
    ///
    /// 错误不会向外传播，只体现在记录的结果、告警和返回的报告中
    ///
    /// # 参数
    /// * `source` - 数据源
    /// * `collector` - 采集器
    /// * `policy` - 重试策略
    ///
    /// # 返回
    /// * `RunReport` - 执行报告
    pub async fn run(
        &self,
        source: &str,
        collector: Arc<dyn Collector>,
        policy: &RetryPolicy,
    ) -> RunReport {
        // 每次逻辑调用只选择一次代理
        let proxy = self
            .proxies
            .select_for_source(source, self.proxies.sensitive_sources())
            .await;
        if self.proxies.sensitive_sources().contains(source) && proxy.is_none() {
            warn!("[{}] 没有可用代理，直接连接", source);
        }
        let proxy_id = proxy.as_ref().map(|p| p.id());

        let max_attempts = policy.max_attempts();
        let mut attempts = 0;
        let mut duration = Duration::ZERO;
        let mut last_error = CollectError::Cancelled;

        for attempt in 1..=max_attempts {
            if self.shutdown.is_cancelled() {
                last_error = CollectError::Cancelled;
                break;
            }
            attempts = attempt;

            let token = self.shutdown.child_token();
            let ctx = CollectContext::new(self.max_items)
                .with_proxy(proxy.clone())
                .with_cancel(token.clone());

            debug!("[{}] 第 {}/{} 次尝试", source, attempt, max_attempts);
            let started = Instant::now();
            let result = tokio::select! {
                result = tokio::time::timeout(policy.timeout, collector.collect(ctx)) => {
                    match result {
                        Ok(result) => result,
                        Err(_) => Err(CollectError::AttemptTimeout {
                            timeout_ms: policy.timeout.as_millis() as u64,
                        }),
                    }
                }
                _ = self.shutdown.cancelled() => Err(CollectError::Cancelled),
            };
            // 超时后通知采集器放弃底层请求
            token.cancel();
            duration = started.elapsed();

            match result {
                Ok(items) => {
                    info!(
                        "[{}] 采集成功: {} 条, 耗时 {}ms",
                        source,
                        items.len(),
                        duration.as_millis()
                    );
                    let alerts = self
                        .monitor
                        .record(source, RunOutcome::success(items.len(), duration))
                        .await;
                    if let Some(ref id) = proxy_id {
                        self.feedback_proxy(id, true).await;
                    }
                    self.notify(&alerts).await;

                    return RunReport {
                        source: source.to_string(),
                        items: Some(items),
                        attempts,
                        duration,
                        error: None,
                        proxy: proxy_id,
                        alerts,
                    };
                }
                Err(CollectError::Cancelled) => {
                    last_error = CollectError::Cancelled;
                    break;
                }
                Err(e) => {
                    warn!(
                        "[{}] 第 {}/{} 次尝试失败: {}",
                        source, attempt, max_attempts, e
                    );
                    last_error = e;

                    if attempt < max_attempts {
                        let backoff = self.backoff_base * attempt;
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = self.shutdown.cancelled() => {
                                last_error = CollectError::Cancelled;
                                break;
                            }
                        }
                    }
                }
            }
        }

        let mut alerts = Vec::new();
        if last_error == CollectError::Cancelled {
            info!("[{}] 采集已取消，不记录结果", source);
        } else {
            error!(
                "[{}] 采集失败，已尝试 {} 次: {}",
                source, attempts, last_error
            );
            alerts = self
                .monitor
                .record(
                    source,
                    RunOutcome::failure(last_error.to_string(), duration),
                )
                .await;
            if let Some(ref id) = proxy_id {
                self.feedback_proxy(id, false).await;
            }
            self.notify(&alerts).await;
        }

        RunReport {
            source: source.to_string(),
            items: None,
            attempts,
            duration,
            error: Some(last_error),
            proxy: proxy_id,
            alerts,
        }
    }

    async fn feedback_proxy(&self, id: &str, success: bool) {
        let result = if success {
            self.proxies.mark_success(id).await
        } else {
            self.proxies.mark_fail(id).await
        };
        // 代理可能已被巡检移除
        if let Err(e) = result {
            debug!("代理反馈失败: {}", e);
        }
    }

    async fn notify(&self, alerts: &[Alert]) {
        let Some(ref notifier) = self.notifier else {
            return;
        };
        for alert in alerts {
            if let Err(e) = notifier.send_alert(alert).await {
                error!("告警通知发送失败 ({}): {}", alert.source, e);
            }
        }
    }
}
