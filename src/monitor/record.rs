//! 数据源健康记录与历史条目

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// 每个数据源保留的最近错误数量
pub const RECENT_ERRORS_CAPACITY: usize = 10;

/// 健康分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::Healthy => write!(f, "healthy"),
            HealthLevel::Warning => write!(f, "warning"),
            HealthLevel::Critical => write!(f, "critical"),
            HealthLevel::Unknown => write!(f, "unknown"),
        }
    }
}

/// 一次采集调用的最终结果
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// 是否成功
    pub success: bool,
    /// 采集到的条目数
    pub item_count: usize,
    /// 耗时
    pub duration: Duration,
    /// 错误信息
    pub error: Option<String>,
}

impl RunOutcome {
    /// 成功结果
    pub fn success(item_count: usize, duration: Duration) -> Self {
        Self {
            success: true,
            item_count,
            duration,
            error: None,
        }
    }

    /// 失败结果
    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            item_count: 0,
            duration,
            error: Some(error.into()),
        }
    }
}

/// 带时间的错误信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub time: DateTime<Local>,
    pub message: String,
}

/// 单个数据源的健康记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceHealthRecord {
    /// 数据源名称
    pub name: String,
    /// 总运行次数
    pub total_runs: u64,
    /// 成功次数
    pub success_count: u64,
    /// 失败次数
    pub fail_count: u64,
    /// 累计采集条目数
    pub total_items: u64,
    /// 成功运行的平均耗时（毫秒）
    pub avg_duration: f64,
    /// 最近运行时间
    pub last_run: Option<DateTime<Local>>,
    /// 最近成功时间
    pub last_success: Option<DateTime<Local>>,
    /// 最近错误
    pub last_error: Option<ErrorEntry>,
    /// 最近的错误（最多 10 条）
    pub recent_errors: VecDeque<ErrorEntry>,
}

impl SourceHealthRecord {
    /// 创建空记录
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 应用一次运行结果
    ///
    /// 平均耗时只在成功时以增量均值更新
    pub fn apply(&mut self, outcome: &RunOutcome, at: DateTime<Local>) {
        self.total_runs += 1;
        self.last_run = Some(at);

        if outcome.success {
            self.success_count += 1;
            self.total_items += outcome.item_count as u64;
            self.last_success = Some(at);

            let n = self.success_count as f64;
            let duration_ms = outcome.duration.as_secs_f64() * 1000.0;
            self.avg_duration = (self.avg_duration * (n - 1.0) + duration_ms) / n;
        } else {
            self.fail_count += 1;
            let entry = ErrorEntry {
                time: at,
                message: outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "未知错误".to_string()),
            };
            self.last_error = Some(entry.clone());
            self.recent_errors.push_back(entry);
            self.trim();
        }
    }

    /// 裁剪最近错误到容量上限
    pub fn trim(&mut self) {
        while self.recent_errors.len() > RECENT_ERRORS_CAPACITY {
            self.recent_errors.pop_front();
        }
    }

    /// 成功比例，无运行记录时为空
    pub fn success_ratio(&self) -> Option<f64> {
        if self.total_runs == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.total_runs as f64)
        }
    }

    /// 四舍五入的成功率百分比，无运行记录时为 0
    pub fn success_rate(&self) -> u32 {
        self.success_ratio()
            .map(|ratio| (ratio * 100.0).round() as u32)
            .unwrap_or(0)
    }

    /// 按成功率分级
    pub fn classify(&self) -> HealthLevel {
        if self.total_runs == 0 {
            return HealthLevel::Unknown;
        }
        match self.success_rate() {
            rate if rate >= 90 => HealthLevel::Healthy,
            rate if rate >= 70 => HealthLevel::Warning,
            _ => HealthLevel::Critical,
        }
    }
}

/// 全局历史记录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub source: String,
    pub time: DateTime<Local>,
    pub success: bool,
    /// 条目数
    pub count: usize,
    /// 耗时（毫秒）
    pub duration: u64,
    pub error: Option<String>,
}

impl HistoryEntry {
    /// 由运行结果构建历史条目
    pub fn from_outcome(source: &str, outcome: &RunOutcome, at: DateTime<Local>) -> Self {
        Self {
            source: source.to_string(),
            time: at,
            success: outcome.success,
            count: outcome.item_count,
            duration: outcome.duration.as_millis() as u64,
            error: outcome.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_average_matches_mean() {
        let mut record = SourceHealthRecord::new("cls");
        let durations = [120u64, 340, 95, 1000, 47];
        for d in durations {
            record.apply(&RunOutcome::success(3, Duration::from_millis(d)), Local::now());
        }
        // 失败不影响平均耗时
        record.apply(
            &RunOutcome::failure("boom", Duration::from_millis(99_999)),
            Local::now(),
        );

        let mean = durations.iter().sum::<u64>() as f64 / durations.len() as f64;
        assert!((record.avg_duration - mean).abs() < 1e-6);
        assert_eq!(record.total_items, 15);
        assert_eq!(record.total_runs, 6);
    }

    #[test]
    fn test_success_rate_rounding_and_classification() {
        let mut record = SourceHealthRecord::new("cls");
        assert_eq!(record.classify(), HealthLevel::Unknown);
        assert_eq!(record.success_rate(), 0);

        // 2/3 = 66.67% -> 67
        record.apply(&RunOutcome::success(1, Duration::ZERO), Local::now());
        record.apply(&RunOutcome::success(1, Duration::ZERO), Local::now());
        record.apply(&RunOutcome::failure("x", Duration::ZERO), Local::now());
        assert_eq!(record.success_rate(), 67);
        assert_eq!(record.classify(), HealthLevel::Critical);

        for _ in 0..7 {
            record.apply(&RunOutcome::success(1, Duration::ZERO), Local::now());
        }
        // 9/10
        assert_eq!(record.success_rate(), 90);
        assert_eq!(record.classify(), HealthLevel::Healthy);
    }

    #[test]
    fn test_recent_errors_capped() {
        let mut record = SourceHealthRecord::new("weibo");
        for i in 0..20 {
            record.apply(
                &RunOutcome::failure(format!("error {}", i), Duration::ZERO),
                Local::now(),
            );
        }
        assert_eq!(record.recent_errors.len(), RECENT_ERRORS_CAPACITY);
        assert_eq!(record.recent_errors.front().unwrap().message, "error 10");
        assert_eq!(record.last_error.as_ref().unwrap().message, "error 19");
    }

    #[test]
    fn test_record_json_field_names() {
        let record = SourceHealthRecord::new("cls");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("totalRuns").is_some());
        assert!(json.get("avgDuration").is_some());
        assert!(json.get("recentErrors").is_some());
    }
}
