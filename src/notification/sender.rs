//! 通知发送器模块
//!
//! 定义通知发送的trait和基础实现

use crate::error::NotificationError;
use crate::monitor::{Alert, AlertLevel};
use async_trait::async_trait;

/// 通知消息结构
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    /// 消息标题
    pub title: String,
    /// 消息内容
    pub content: String,
    /// 消息类型
    pub message_type: MessageType,
}

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// 错误告警
    Alert,
    /// 警告
    Warning,
    /// 信息消息
    Info,
}

impl From<AlertLevel> for MessageType {
    fn from(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Error => MessageType::Alert,
            AlertLevel::Warning => MessageType::Warning,
        }
    }
}

/// 通知发送器trait
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 发送监控告警
    ///
    /// # 参数
    /// * `alert` - 告警
    ///
    /// # 返回
    /// * `Result<(), NotificationError>` - 发送结果
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotificationError>;

    /// 发送自定义消息
    async fn send_message(&self, message: &NotificationMessage) -> Result<(), NotificationError>;

    /// 测试连接
    async fn test_connection(&self) -> Result<(), NotificationError>;
}
