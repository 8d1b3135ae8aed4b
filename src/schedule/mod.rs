//! 调度模块
//!
//! 分类表、市场感知的调度频率、定时器以及智能调度器

pub mod cadence;
pub mod market;
pub mod registry;
pub mod scheduler;
pub mod timer;

pub use cadence::{CadenceSpec, CronCadence};
pub use market::{is_trading_hours, Market};
pub use registry::{default_categories, CategoryDescriptor, CategoryTable};
pub use scheduler::{
    CheckStatus, CollectorCheck, MaintenanceConfig, ScheduledTask, SchedulerStatus,
    SmartScheduler,
};
pub use timer::{CadenceTimer, ManualCadenceTimer, TimerCallback, TimerHandle, TokioCadenceTimer};
