//! 采集执行模块
//!
//! 定义采集器接口，并以超时、重试和退避执行单次采集调用

pub mod collector;
pub mod task;

// 重新导出主要类型
pub use collector::{
    collector_fn, CollectContext, CollectedItem, Collector, CollectorMap, FnCollector,
};
pub use task::{RetryPolicy, RunReport, TaskRunner};
