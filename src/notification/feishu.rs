//! 飞书通知发送器模块
//!
//! 实现飞书webhook通知功能

use crate::error::NotificationError;
use crate::monitor::Alert;
use crate::notification::sender::{MessageType, NotificationMessage, NotificationSender};
use crate::notification::template::HandlebarsTemplate;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

/// 飞书通知发送器
pub struct FeishuSender {
    /// HTTP客户端
    client: Client,
    /// webhook URL
    webhook_url: String,
    /// 告警模板
    template: HandlebarsTemplate,
}

impl FeishuSender {
    /// 创建新的飞书发送器
    ///
    /// # 参数
    /// * `webhook_url` - webhook URL
    /// * `template` - 自定义告警模板，为空时使用内置模板
    ///
    /// # 返回
    /// * `Result<Self, NotificationError>` - 发送器实例
    pub fn new(
        webhook_url: impl Into<String>,
        template: Option<&str>,
    ) -> Result<Self, NotificationError> {
        let webhook_url = webhook_url.into();
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(NotificationError::ConfigError(format!(
                "无效的webhook URL: {}",
                webhook_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotificationError::ConfigError(format!("创建HTTP客户端失败: {}", e)))?;

        let template = match template {
            Some(t) => HandlebarsTemplate::new(t)?,
            None => HandlebarsTemplate::default(),
        };

        Ok(Self {
            client,
            webhook_url,
            template,
        })
    }

    /// 构建飞书消息体
    fn build_message_body(&self, message: &NotificationMessage) -> Value {
        let color = match message.message_type {
            MessageType::Alert => "red",
            MessageType::Warning => "orange",
            MessageType::Info => "blue",
        };

        json!({
            "msg_type": "interactive",
            "card": {
                "elements": [
                    {
                        "tag": "div",
                        "text": {
                            "content": message.content,
                            "tag": "lark_md"
                        }
                    }
                ],
                "header": {
                    "title": {
                        "content": message.title,
                        "tag": "plain_text"
                    },
                    "template": color
                }
            }
        })
    }

    /// 发送消息到飞书
    async fn send_to_webhook(&self, body: &Value) -> Result<(), NotificationError> {
        debug!("发送消息到飞书webhook: {}", self.webhook_url);

        let response = self
            .client
            .post(&self.webhook_url)
            .json(body)
            .send()
            .await
            .map_err(|e| NotificationError::SendError(format!("发送飞书消息失败: {}", e)))?;

        if response.status().is_success() {
            info!("飞书消息发送成功");
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("飞书消息发送失败: {} - {}", status, text);
            Err(NotificationError::SendError(format!(
                "飞书消息发送失败: {}",
                status
            )))
        }
    }
}

#[async_trait]
impl NotificationSender for FeishuSender {
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotificationError> {
        let message = NotificationMessage {
            title: format!("🚨 采集告警 - {}", alert.source),
            content: self.template.render_alert(alert)?,
            message_type: alert.level.into(),
        };

        let body = self.build_message_body(&message);
        self.send_to_webhook(&body).await
    }

    async fn send_message(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        let body = self.build_message_body(message);
        self.send_to_webhook(&body).await
    }

    async fn test_connection(&self) -> Result<(), NotificationError> {
        let test_message = NotificationMessage {
            title: "连接测试".to_string(),
            content: "这是一条测试消息，用于验证飞书webhook连接是否正常。".to_string(),
            message_type: MessageType::Info,
        };

        let body = self.build_message_body(&test_message);
        self.send_to_webhook(&body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_webhook_url() {
        assert!(matches!(
            FeishuSender::new("ftp://example.com", None),
            Err(NotificationError::ConfigError(_))
        ));
    }

    #[test]
    fn test_message_body_color() {
        let sender = FeishuSender::new("https://example.com/hook", None).unwrap();
        let body = sender.build_message_body(&NotificationMessage {
            title: "t".to_string(),
            content: "c".to_string(),
            message_type: MessageType::Warning,
        });
        assert_eq!(body["msg_type"], "interactive");
        assert_eq!(body["card"]["header"]["template"], "orange");
        assert_eq!(body["card"]["elements"][0]["text"]["content"], "c");
    }
}
