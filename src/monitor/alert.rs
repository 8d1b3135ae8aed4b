//! 告警定义

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 成功率告警的最少运行次数
pub const LOW_SUCCESS_MIN_RUNS: u64 = 5;
/// 成功率告警阈值
pub const LOW_SUCCESS_THRESHOLD: f64 = 0.80;
/// 慢响应告警的最少成功次数
pub const SLOW_RESPONSE_MIN_SAMPLES: u64 = 3;
/// 慢响应告警阈值（毫秒）
pub const SLOW_RESPONSE_THRESHOLD_MS: f64 = 30_000.0;
/// 连续失败告警阈值
pub const CONSECUTIVE_FAILS_THRESHOLD: usize = 3;

/// 告警类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    LowSuccessRate,
    SlowResponse,
    ConsecutiveFails,
}

impl AlertKind {
    /// 告警类型对应的默认级别
    pub fn level(&self) -> AlertLevel {
        match self {
            AlertKind::ConsecutiveFails => AlertLevel::Error,
            AlertKind::LowSuccessRate | AlertKind::SlowResponse => AlertLevel::Warning,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::LowSuccessRate => write!(f, "LOW_SUCCESS_RATE"),
            AlertKind::SlowResponse => write!(f, "SLOW_RESPONSE"),
            AlertKind::ConsecutiveFails => write!(f, "CONSECUTIVE_FAILS"),
        }
    }
}

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Error,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Error => write!(f, "error"),
        }
    }
}

/// 告警记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub source: String,
    pub kind: AlertKind,
    pub message: String,
    pub time: DateTime<Local>,
    pub level: AlertLevel,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    /// 创建新告警，级别由类型决定
    pub fn new(source: impl Into<String>, kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            kind,
            message: message.into(),
            time: Local::now(),
            level: kind.level(),
            acknowledged: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_serialization() {
        let alert = Alert::new("cls", AlertKind::ConsecutiveFails, "连续采集失败 3 次");
        assert_eq!(alert.level, AlertLevel::Error);
        assert!(!alert.acknowledged);

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "CONSECUTIVE_FAILS");
        assert_eq!(json["level"], "error");

        let back: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, alert.id);
    }

    #[test]
    fn test_alert_ids_are_unique() {
        let a = Alert::new("cls", AlertKind::SlowResponse, "slow");
        let b = Alert::new("cls", AlertKind::SlowResponse, "slow");
        assert_ne!(a.id, b.id);
        assert_eq!(a.level, AlertLevel::Warning);
    }
}
