//! Collector Vitals - 采集任务调度与容错层
//!
//! 为一组不可靠的数据采集器提供：
//! - 按市场交易时段切换频率的周期调度
//! - 超时、重试与线性退避
//! - 敏感数据源的代理池轮询与健康分级
//! - 采集健康监控、告警与快照持久化
//! - 飞书告警通知

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod proxy;
pub mod runner;
pub mod schedule;

// 重新导出主要类型
pub use config::{Config, GlobalConfig};
pub use error::CollectorVitalsError;
pub use monitor::{Alert, HealthMonitor};
pub use proxy::{ProxyEndpoint, ProxyPool};
pub use runner::{CollectContext, Collector, RetryPolicy, RunReport, TaskRunner};
pub use schedule::{CategoryTable, Market, SmartScheduler};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
