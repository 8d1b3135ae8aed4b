//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use std::path::PathBuf;
use thiserror::Error;

/// Collector Vitals 的主要错误类型
#[derive(Error, Debug)]
pub enum CollectorVitalsError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 调度相关错误
    #[error("调度错误: {0}")]
    Schedule(#[from] ScheduleError),

    /// 采集相关错误
    #[error("采集错误: {0}")]
    Collect(#[from] CollectError),

    /// 代理池相关错误
    #[error("代理错误: {0}")]
    Proxy(#[from] ProxyError),

    /// 持久化相关错误
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),

    /// 通知相关错误
    #[error("通知错误: {0}")]
    Notification(#[from] NotificationError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 调度错误类型
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// 调度表达式无效
    #[error("无效的调度表达式 `{expression}`: {reason}")]
    InvalidCadence { expression: String, reason: String },

    /// 未注册的数据源
    #[error("未注册的数据源: {0}")]
    UnknownSource(String),

    /// 数据源仍有未完成的采集
    #[error("数据源正在采集中: {0}")]
    SourceBusy(String),

    /// 定时器已关闭
    #[error("定时器已关闭")]
    TimerStopped,
}

/// 单次采集尝试的错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectError {
    /// 超出单次尝试的时间预算
    #[error("采集超时 ({timeout_ms}ms)")]
    AttemptTimeout { timeout_ms: u64 },

    /// 采集器返回的业务错误
    #[error("{0}")]
    CollectorFailure(String),

    /// 调用被取消
    #[error("采集已取消")]
    Cancelled,
}

impl CollectError {
    /// 便捷构造采集器失败
    pub fn failure(message: impl Into<String>) -> Self {
        CollectError::CollectorFailure(message.into())
    }
}

/// 代理错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 代理不可达（健康检查失败或经代理的连接失败）
    #[error("代理不可达 {id}: {reason}")]
    Unreachable { id: String, reason: String },

    /// 代理配置条目无法解析
    #[error("无法解析代理配置: {0}")]
    InvalidEntry(String),

    /// 代理池中不存在该代理
    #[error("代理不存在: {0}")]
    UnknownEndpoint(String),
}

/// 持久化错误类型
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// 读取快照失败
    #[error("读取快照失败 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 写入快照失败
    #[error("写入快照失败 {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 快照内容无法解析或序列化
    #[error("快照格式错误: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 通知错误类型
#[derive(Error, Debug)]
pub enum NotificationError {
    /// 发送失败
    #[error("通知发送失败: {0}")]
    SendError(String),

    /// 模板渲染错误
    #[error("模板渲染失败: {0}")]
    TemplateError(String),

    /// 配置错误
    #[error("通知配置错误: {0}")]
    ConfigError(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, CollectorVitalsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: CollectorVitalsError = ScheduleError::UnknownSource("cls".to_string()).into();
        assert!(matches!(err, CollectorVitalsError::Schedule(_)));
        assert!(err.to_string().contains("cls"));
    }

    #[test]
    fn test_collect_error_display() {
        let timeout = CollectError::AttemptTimeout { timeout_ms: 1500 };
        assert!(timeout.to_string().contains("1500ms"));

        let failure = CollectError::failure("HTTP 503");
        assert_eq!(failure.to_string(), "HTTP 503");
    }
}
