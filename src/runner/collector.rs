//! 采集器接口
//!
//! 采集器对本层是黑盒：给定调用参数，异步返回条目列表或带可读信息的错误

use crate::error::CollectError;
use crate::proxy::ProxyEndpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 采集到的单条数据
pub type CollectedItem = serde_json::Value;

/// 数据源到采集器的映射
pub type CollectorMap = HashMap<String, Arc<dyn Collector>>;

/// 单次采集调用的上下文
#[derive(Debug, Clone)]
pub struct CollectContext {
    /// 最多采集的条目数
    pub max_items: usize,
    /// 需要经由的代理
    pub proxy: Option<ProxyEndpoint>,
    /// 超时或关闭时被取消
    pub cancel: CancellationToken,
}

impl CollectContext {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            proxy: None,
            cancel: CancellationToken::new(),
        }
    }

    /// 设置代理
    pub fn with_proxy(mut self, proxy: Option<ProxyEndpoint>) -> Self {
        self.proxy = proxy;
        self
    }

    /// 设置取消令牌
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 是否已被取消
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 采集器trait
#[async_trait]
pub trait Collector: Send + Sync {
    /// 执行一次采集
    ///
    /// # 参数
    /// * `ctx` - 调用上下文
    ///
    /// # 返回
    /// * `Result<Vec<CollectedItem>, CollectError>` - 采集到的条目
    async fn collect(&self, ctx: CollectContext) -> Result<Vec<CollectedItem>, CollectError>;

    /// 轻量状态查询，用于被动健康检查；返回 `None` 表示不支持
    fn status(&self) -> Option<serde_json::Value> {
        None
    }
}

/// 由异步闭包构成的采集器
pub struct FnCollector<F> {
    func: F,
}

impl<F> FnCollector<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Collector for FnCollector<F>
where
    F: Fn(CollectContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<CollectedItem>, CollectError>> + Send,
{
    async fn collect(&self, ctx: CollectContext) -> Result<Vec<CollectedItem>, CollectError> {
        (self.func)(ctx).await
    }
}

/// 将异步闭包包装为共享的采集器
pub fn collector_fn<F, Fut>(func: F) -> Arc<dyn Collector>
where
    F: Fn(CollectContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<CollectedItem>, CollectError>> + Send + 'static,
{
    Arc::new(FnCollector::new(func))
}
