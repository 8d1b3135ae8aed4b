//! 消息模板模块
//!
//! 使用 handlebars 渲染告警消息

use crate::error::NotificationError;
use crate::monitor::Alert;
use handlebars::Handlebars;
use serde::Serialize;

const TEMPLATE_NAME: &str = "alert";

/// 模板上下文数据
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    /// 告警编号
    pub alert_id: String,
    /// 数据源
    pub source: String,
    /// 告警类型
    pub kind: String,
    /// 告警级别
    pub level: String,
    /// 告警内容
    pub message: String,
    /// 时间戳
    pub timestamp: String,
}

impl From<&Alert> for TemplateContext {
    fn from(alert: &Alert) -> Self {
        Self {
            alert_id: alert.id.clone(),
            source: alert.source.clone(),
            kind: alert.kind.to_string(),
            level: alert.level.to_string(),
            message: alert.message.clone(),
            timestamp: alert.time.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Handlebars 告警模板
pub struct HandlebarsTemplate {
    registry: Handlebars<'static>,
}

impl HandlebarsTemplate {
    /// 创建并校验模板
    ///
    /// # 参数
    /// * `template` - 模板字符串
    ///
    /// # 返回
    /// * `Result<Self, NotificationError>` - 模板语法错误时返回错误
    pub fn new(template: &str) -> Result<Self, NotificationError> {
        let mut registry = Handlebars::new();
        // 飞书消息使用 markdown，不做 HTML 转义
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string(TEMPLATE_NAME, template)
            .map_err(|e| NotificationError::TemplateError(e.to_string()))?;

        Ok(Self { registry })
    }

    /// 渲染模板
    pub fn render(&self, context: &TemplateContext) -> Result<String, NotificationError> {
        self.registry
            .render(TEMPLATE_NAME, context)
            .map_err(|e| NotificationError::TemplateError(e.to_string()))
    }

    /// 渲染告警
    pub fn render_alert(&self, alert: &Alert) -> Result<String, NotificationError> {
        self.render(&TemplateContext::from(alert))
    }
}

impl Default for HandlebarsTemplate {
    fn default() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        // 内置模板由单元测试保证可以编译
        if let Err(e) = registry.register_template_string(TEMPLATE_NAME, default_alert_template())
        {
            tracing::error!("内置告警模板无效: {}", e);
        }
        Self { registry }
    }
}

/// 默认的告警消息模板
pub fn default_alert_template() -> &'static str {
    r#"**数据源**: {{source}}
**告警类型**: {{kind}}
**级别**: {{level}}
**告警内容**: {{message}}
**告警时间**: {{timestamp}}"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::AlertKind;

    #[test]
    fn test_default_template_renders_alert() {
        let alert = Alert::new("cls", AlertKind::ConsecutiveFails, "连续采集失败 3 次: <timeout>");
        let text = HandlebarsTemplate::default().render_alert(&alert).unwrap();

        assert!(text.contains("**数据源**: cls"));
        assert!(text.contains("CONSECUTIVE_FAILS"));
        // 不做 HTML 转义
        assert!(text.contains("<timeout>"));
    }

    #[test]
    fn test_custom_template_with_condition() {
        let template =
            HandlebarsTemplate::new("{{source}}{{#if message}} - {{message}}{{/if}}").unwrap();
        let alert = Alert::new("weibo", AlertKind::SlowResponse, "平均耗时过长");
        assert_eq!(template.render_alert(&alert).unwrap(), "weibo - 平均耗时过长");
    }

    #[test]
    fn test_invalid_template_rejected() {
        let err = HandlebarsTemplate::new("{{#if source}}unclosed").err().unwrap();
        assert!(matches!(err, NotificationError::TemplateError(_)));
    }
}
