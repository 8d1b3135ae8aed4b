//! 代理可达性探测

use crate::error::ProxyError;
use crate::proxy::endpoint::ProxyEndpoint;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// 代理探测接口
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    /// 经由代理发起一次轻量请求，成功返回 `Ok(())`
    async fn probe(&self, endpoint: &ProxyEndpoint) -> Result<(), ProxyError>;
}

/// 基于 reqwest 的 HTTP 探测
#[derive(Debug, Clone)]
pub struct HttpProxyProbe {
    /// 探测地址
    probe_url: String,
    /// 单次探测超时
    timeout: Duration,
}

impl HttpProxyProbe {
    /// 创建新的探测器
    ///
    /// # 参数
    /// * `probe_url` - 探测地址
    /// * `timeout` - 请求超时
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }

    /// 探测超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl ProxyProbe for HttpProxyProbe {
    async fn probe(&self, endpoint: &ProxyEndpoint) -> Result<(), ProxyError> {
        let unreachable = |reason: String| ProxyError::Unreachable {
            id: endpoint.id(),
            reason,
        };

        // 每个代理需要独立的客户端
        let client = Client::builder()
            .proxy(endpoint.to_reqwest_proxy()?)
            .timeout(self.timeout)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()
            .map_err(|e| unreachable(e.to_string()))?;

        let response = client
            .get(&self.probe_url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if response.status().as_u16() == 200 {
            Ok(())
        } else {
            Err(unreachable(format!("HTTP {}", response.status())))
        }
    }
}
