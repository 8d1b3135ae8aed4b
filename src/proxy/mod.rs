//! 代理池模块
//!
//! 为敏感数据源提供轮询选择、健康分级和并发探测的出口代理

pub mod endpoint;
pub mod pool;
pub mod probe;

// 重新导出主要类型
pub use endpoint::{ProxyCredentials, ProxyEndpoint, ProxyHealth};
pub use pool::{ProbeSummary, ProxyPool, ProxyPoolStatus, ProxyUsage};
pub use probe::{HttpProxyProbe, ProxyProbe};
