//! 采集健康监控模块
//!
//! 统计各数据源的成功率与耗时，检测连续失败并产生告警，支持快照持久化

pub mod alert;
pub mod health;
pub mod record;
pub mod snapshot;

// 重新导出主要类型
pub use alert::{Alert, AlertKind, AlertLevel};
pub use health::{format_uptime, HealthMonitor, MonitorStatus, SourceSummary};
pub use record::{ErrorEntry, HealthLevel, HistoryEntry, RunOutcome, SourceHealthRecord};
pub use snapshot::{JsonFileStore, MonitorSnapshot, SnapshotStore};
