//! 通知模块
//!
//! 将监控告警渲染为消息并推送到飞书

pub mod feishu;
pub mod sender;
pub mod template;

// 重新导出主要类型
pub use feishu::FeishuSender;
pub use sender::{MessageType, NotificationMessage, NotificationSender};
pub use template::{default_alert_template, HandlebarsTemplate, TemplateContext};
