//! 代理池
//!
//! 管理代理端点的注册、轮询选择、健康状态和并发探测

use crate::config::GlobalConfig;
use crate::error::ProxyError;
use crate::proxy::endpoint::{ProxyEndpoint, ProxyHealth};
use crate::proxy::probe::{HttpProxyProbe, ProxyProbe};
use chrono::{DateTime, Local};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// 批量探测汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

/// 单个代理的使用情况
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUsage {
    pub id: String,
    pub status: ProxyHealth,
    pub usage_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    /// 成功率百分比，未使用时为空
    pub success_rate: Option<f64>,
}

/// 代理池状态报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyPoolStatus {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub dead: usize,
    pub unknown: usize,
    pub last_check: Option<DateTime<Local>>,
    pub sensitive_sources: Vec<String>,
    pub proxies: Vec<ProxyUsage>,
}

#[derive(Debug, Default)]
struct PoolState {
    endpoints: Vec<ProxyEndpoint>,
    cursor: usize,
    last_check: Option<DateTime<Local>>,
}

impl PoolState {
    fn find_mut(&mut self, id: &str) -> Option<&mut ProxyEndpoint> {
        self.endpoints.iter_mut().find(|e| e.id() == id)
    }
}

/// 代理池
pub struct ProxyPool {
    /// 代理状态
    state: RwLock<PoolState>,
    /// 需要走代理的数据源
    sensitive_sources: HashSet<String>,
    /// 探测实现
    probe: Arc<dyn ProxyProbe>,
    /// 单次探测的时间上限
    probe_timeout: Duration,
}

impl ProxyPool {
    /// 创建空的代理池
    ///
    /// # 参数
    /// * `probe` - 探测实现
    /// * `probe_timeout` - 单次探测的时间上限
    pub fn new(probe: Arc<dyn ProxyProbe>, probe_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            sensitive_sources: HashSet::new(),
            probe,
            probe_timeout,
        }
    }

    /// 设置需要走代理的数据源
    pub fn with_sensitive_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// 按全局配置构建代理池，并加载内联列表和环境变量中的代理
    pub async fn from_config(global: &GlobalConfig) -> Self {
        let timeout = Duration::from_secs(global.proxy_probe_timeout_seconds);
        let probe = Arc::new(HttpProxyProbe::new(global.proxy_probe_url.clone(), timeout));
        let pool = Self::new(probe, timeout)
            .with_sensitive_sources(global.sensitive_sources.iter().cloned());

        if let Some(ref proxies) = global.proxies {
            pool.load_from_config(proxies).await;
        }
        pool.load_from_env(&global.proxy_env_vars).await;
        pool
    }

    /// 需要走代理的数据源
    pub fn sensitive_sources(&self) -> &HashSet<String> {
        &self.sensitive_sources
    }

    /// 添加代理，按 `protocol://host:port` 去重
    ///
    /// # 返回
    /// * `bool` - 是否为新代理
    pub async fn add(&self, endpoint: ProxyEndpoint) -> bool {
        let mut state = self.state.write().await;
        let id = endpoint.id();
        if state.endpoints.iter().any(|e| e.id() == id) {
            debug!("代理 {} 已存在，跳过", id);
            return false;
        }

        let mut endpoint = endpoint;
        endpoint.usage_count = 0;
        endpoint.success_count = 0;
        endpoint.fail_count = 0;
        endpoint.health = ProxyHealth::Unknown;
        endpoint.added_at = Local::now();
        endpoint.last_success = None;
        endpoint.last_fail = None;

        info!("添加代理: {}", id);
        state.endpoints.push(endpoint);
        true
    }

    /// 批量添加代理
    ///
    /// # 返回
    /// * `usize` - 新增数量
    pub async fn add_many<I>(&self, endpoints: I) -> usize
    where
        I: IntoIterator<Item = ProxyEndpoint>,
    {
        let mut added = 0;
        for endpoint in endpoints {
            if self.add(endpoint).await {
                added += 1;
            }
        }
        added
    }

    /// 解析逗号分隔的代理列表并加入代理池，无法解析的条目记录日志后跳过
    ///
    /// # 返回
    /// * `usize` - 新增数量
    pub async fn load_from_config(&self, spec: &str) -> usize {
        let endpoints: Vec<ProxyEndpoint> = spec
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| match ProxyEndpoint::parse(entry) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    error!("解析代理失败: {}", e);
                    None
                }
            })
            .collect();

        self.add_many(endpoints).await
    }

    /// 从环境变量加载代理，取第一个非空的变量
    ///
    /// # 返回
    /// * `usize` - 新增数量
    pub async fn load_from_env(&self, vars: &[String]) -> usize {
        let found = vars.iter().find_map(|var| {
            std::env::var(var)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(|value| (var, value))
        });

        match found {
            Some((var, value)) => {
                let added = self.load_from_config(&value).await;
                info!("从环境变量 {} 加载了 {} 个代理", var, added);
                added
            }
            None => 0,
        }
    }

    /// 轮询选择一个未失效的代理，并增加其使用次数
    pub async fn next(&self) -> Option<ProxyEndpoint> {
        let mut state = self.state.write().await;
        let available: Vec<usize> = state
            .endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| e.health != ProxyHealth::Dead)
            .map(|(i, _)| i)
            .collect();

        if available.is_empty() {
            return None;
        }

        let index = available[state.cursor % available.len()];
        state.cursor = state.cursor.wrapping_add(1);

        let endpoint = &mut state.endpoints[index];
        endpoint.usage_count += 1;
        Some(endpoint.clone())
    }

    /// 为数据源选择代理，非敏感数据源不使用代理
    pub async fn select_for_source(
        &self,
        source: &str,
        sensitive: &HashSet<String>,
    ) -> Option<ProxyEndpoint> {
        if !sensitive.contains(source) {
            return None;
        }
        self.next().await
    }

    /// 记录代理请求成功
    pub async fn mark_success(&self, id: &str) -> Result<ProxyHealth, ProxyError> {
        let mut state = self.state.write().await;
        let endpoint = state
            .find_mut(id)
            .ok_or_else(|| ProxyError::UnknownEndpoint(id.to_string()))?;

        let before = endpoint.health;
        endpoint.record_success();
        if before != endpoint.health {
            info!("代理 {} 状态变化: {} -> {}", id, before, endpoint.health);
        }
        Ok(endpoint.health)
    }

    /// 记录代理请求失败
    pub async fn mark_fail(&self, id: &str) -> Result<ProxyHealth, ProxyError> {
        let mut state = self.state.write().await;
        let endpoint = state
            .find_mut(id)
            .ok_or_else(|| ProxyError::UnknownEndpoint(id.to_string()))?;

        let before = endpoint.health;
        endpoint.record_fail();
        if before != endpoint.health {
            warn!(
                "代理 {} 状态变化: {} -> {} (失败 {} 次, 成功 {} 次)",
                id, before, endpoint.health, endpoint.fail_count, endpoint.success_count
            );
        }
        Ok(endpoint.health)
    }

    /// 带超时的单次探测，不修改状态
    async fn run_probe(&self, endpoint: &ProxyEndpoint) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.probe.probe(endpoint)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("代理探测失败: {}", e);
                false
            }
            Err(_) => {
                debug!("代理 {} 探测超时 ({:?})", endpoint.id(), self.probe_timeout);
                false
            }
        }
    }

    fn apply_probe(state: &mut PoolState, id: &str, reachable: bool) {
        if let Some(endpoint) = state.find_mut(id) {
            endpoint.health = if reachable {
                ProxyHealth::Healthy
            } else {
                ProxyHealth::Unhealthy
            };
        }
    }

    /// 探测单个代理并更新其状态
    ///
    /// # 返回
    /// * `Result<bool, ProxyError>` - 是否可达；代理不存在时返回错误
    pub async fn probe_health(&self, id: &str) -> Result<bool, ProxyError> {
        let endpoint = self
            .get(id)
            .await
            .ok_or_else(|| ProxyError::UnknownEndpoint(id.to_string()))?;

        let reachable = self.run_probe(&endpoint).await;
        let mut state = self.state.write().await;
        Self::apply_probe(&mut state, id, reachable);
        Ok(reachable)
    }

    /// 并发探测全部代理，等待所有探测结束后汇总
    pub async fn probe_all(&self) -> ProbeSummary {
        let endpoints: Vec<ProxyEndpoint> = self.state.read().await.endpoints.clone();

        let results = join_all(endpoints.iter().map(|endpoint| async move {
            (endpoint.id(), self.run_probe(endpoint).await)
        }))
        .await;

        let mut state = self.state.write().await;
        for (id, reachable) in &results {
            Self::apply_probe(&mut state, id, *reachable);
        }
        state.last_check = Some(Local::now());

        let healthy = results.iter().filter(|(_, ok)| *ok).count();
        let summary = ProbeSummary {
            total: results.len(),
            healthy,
            unhealthy: results.len() - healthy,
        };
        info!(
            "代理健康检查完成: {}/{} 可用",
            summary.healthy, summary.total
        );
        summary
    }

    /// 移除所有失效代理
    ///
    /// # 返回
    /// * `usize` - 移除数量
    pub async fn remove_dead(&self) -> usize {
        let mut state = self.state.write().await;
        let before = state.endpoints.len();
        state.endpoints.retain(|e| e.health != ProxyHealth::Dead);
        let removed = before - state.endpoints.len();
        if removed > 0 {
            info!("移除了 {} 个失效代理", removed);
        }
        removed
    }

    /// 按标识查找代理
    pub async fn get(&self, id: &str) -> Option<ProxyEndpoint> {
        let state = self.state.read().await;
        state.endpoints.iter().find(|e| e.id() == id).cloned()
    }

    /// 代理数量
    pub async fn len(&self) -> usize {
        self.state.read().await.endpoints.len()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.endpoints.is_empty()
    }

    /// 代理池状态报告
    pub async fn status(&self) -> ProxyPoolStatus {
        let state = self.state.read().await;
        let count = |health: ProxyHealth| {
            state
                .endpoints
                .iter()
                .filter(|e| e.health == health)
                .count()
        };

        let mut sensitive_sources: Vec<String> = self.sensitive_sources.iter().cloned().collect();
        sensitive_sources.sort();

        ProxyPoolStatus {
            total: state.endpoints.len(),
            healthy: count(ProxyHealth::Healthy),
            unhealthy: count(ProxyHealth::Unhealthy),
            dead: count(ProxyHealth::Dead),
            unknown: count(ProxyHealth::Unknown),
            last_check: state.last_check,
            sensitive_sources,
            proxies: state
                .endpoints
                .iter()
                .map(|e| ProxyUsage {
                    id: e.id(),
                    status: e.health,
                    usage_count: e.usage_count,
                    success_count: e.success_count,
                    fail_count: e.fail_count,
                    success_rate: e.success_rate(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// 按主机名决定探测结果的假探测器
    struct StaticProbe;

    #[async_trait]
    impl ProxyProbe for StaticProbe {
        async fn probe(&self, endpoint: &ProxyEndpoint) -> Result<(), ProxyError> {
            if endpoint.host.starts_with("good") {
                Ok(())
            } else {
                Err(ProxyError::Unreachable {
                    id: endpoint.id(),
                    reason: "refused".to_string(),
                })
            }
        }
    }

    fn pool() -> ProxyPool {
        ProxyPool::new(Arc::new(StaticProbe), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let pool = pool();
        assert!(pool.add(ProxyEndpoint::new("http", "a", 80)).await);
        assert!(!pool.add(ProxyEndpoint::new("http", "a", 80)).await);
        assert!(pool.add(ProxyEndpoint::new("https", "a", 80)).await);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_load_from_config_skips_invalid_entries() {
        let pool = pool();
        let added = pool
            .load_from_config("1.1.1.1:8080, socks5://2.2.2.2:1080:u:p,,http://:1, 1.1.1.1:8080")
            .await;
        assert_eq!(added, 2);
        assert!(pool.get("socks5://2.2.2.2:1080").await.is_some());
    }

    #[tokio::test]
    async fn test_round_robin_skips_dead() {
        let pool = pool();
        pool.add_many(vec![
            ProxyEndpoint::new("http", "a", 1),
            ProxyEndpoint::new("http", "b", 1),
            ProxyEndpoint::new("http", "c", 1),
        ])
        .await;

        for _ in 0..5 {
            pool.mark_fail("http://b:1").await.unwrap();
        }
        assert_eq!(pool.get("http://b:1").await.unwrap().health, ProxyHealth::Dead);

        let picks: Vec<String> = futures::future::join_all((0..4).map(|_| pool.next()))
            .await
            .into_iter()
            .map(|e| e.unwrap().host)
            .collect();
        assert!(picks.iter().all(|h| h != "b"));
        assert_eq!(picks.iter().filter(|h| *h == "a").count(), 2);
        assert_eq!(pool.get("http://a:1").await.unwrap().usage_count, 2);
    }

    #[tokio::test]
    async fn test_next_on_empty_or_dead_pool() {
        let pool = pool();
        assert!(pool.next().await.is_none());

        pool.add(ProxyEndpoint::new("http", "a", 1)).await;
        for _ in 0..5 {
            pool.mark_fail("http://a:1").await.unwrap();
        }
        assert!(pool.next().await.is_none());
        assert_eq!(pool.remove_dead().await, 1);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_select_for_source() {
        let pool = pool().with_sensitive_sources(["xueqiu"]);
        pool.add(ProxyEndpoint::new("http", "a", 1)).await;

        let sensitive = pool.sensitive_sources().clone();
        assert!(pool.select_for_source("cls", &sensitive).await.is_none());
        assert!(pool.select_for_source("xueqiu", &sensitive).await.is_some());
    }

    #[tokio::test]
    async fn test_mark_unknown_endpoint() {
        let pool = pool();
        let err = pool.mark_success("http://missing:1").await.unwrap_err();
        assert!(matches!(err, ProxyError::UnknownEndpoint(_)));
    }

    #[tokio::test]
    async fn test_probe_updates_state_and_status() {
        let pool = pool();
        pool.add(ProxyEndpoint::new("http", "good-1", 1)).await;
        pool.add(ProxyEndpoint::new("http", "bad-1", 1)).await;

        assert!(pool.probe_health("http://good-1:1").await.unwrap());
        assert!(!pool.probe_health("http://bad-1:1").await.unwrap());

        let status = pool.status().await;
        assert_eq!(status.total, 2);
        assert_eq!(status.healthy, 1);
        assert_eq!(status.unhealthy, 1);
        assert!(status.last_check.is_none());
    }
}
