//! 调度频率表达式
//!
//! 基于 `cron` crate 解析调度表达式，支持交易时段/非交易时段两套频率

use crate::error::ScheduleError;
use crate::schedule::market::Market;
use chrono::{DateTime, TimeZone};
use cron::Schedule;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// 合并两套表达式查找下一次触发时最多检查的候选时刻数
const MAX_CANDIDATES: usize = 500_000;

/// 已解析的 cron 表达式
///
/// 保留原始表达式用于展示，内部保存规范化后的 6/7 段表达式
#[derive(Clone)]
pub struct CronCadence {
    expression: String,
    schedule: Schedule,
}

impl CronCadence {
    /// 解析调度表达式
    ///
    /// # 参数
    /// * `expression` - 5段（分钟开头）、6段（秒开头）或7段（带年份）表达式
    ///
    /// # 返回
    /// * `Result<Self, ScheduleError>` - 解析结果
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let normalized = normalize_expression(expression)?;
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCadence {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    /// 原始表达式
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 计算给定时刻之后的下一次触发时间
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(now).next()
    }

    /// 给定时刻之后的全部触发时间，按时间顺序
    pub fn upcoming<'a, Tz: TimeZone + 'a>(
        &'a self,
        now: &DateTime<Tz>,
    ) -> impl Iterator<Item = DateTime<Tz>> + 'a {
        self.schedule.after(now)
    }
}

impl fmt::Debug for CronCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronCadence").field(&self.expression).finish()
    }
}

impl fmt::Display for CronCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl PartialEq for CronCadence {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

/// 分类的调度频率
#[derive(Debug, Clone, PartialEq)]
pub enum CadenceSpec {
    /// 交易时段使用高频表达式，其余时间使用低频表达式
    MarketAware {
        market: Market,
        trading_hours: CronCadence,
        off_hours: CronCadence,
    },
    /// 固定频率
    Fixed(CronCadence),
}

impl CadenceSpec {
    /// 根据当前时刻选择生效的表达式
    pub fn resolve<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> &CronCadence {
        match self {
            CadenceSpec::MarketAware {
                market,
                trading_hours,
                off_hours,
            } => {
                if market.is_trading_hours(now) {
                    trading_hours
                } else {
                    off_hours
                }
            }
            CadenceSpec::Fixed(cadence) => cadence,
        }
    }

    /// 计算下一次触发时间
    ///
    /// 区分交易时段时按时间顺序合并两套表达式的候选时刻，取第一个
    /// 由该时刻生效的表达式产生的候选，交易时段开始后立即切换到高频表达式
    pub fn next_fire<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let (market, trading_hours, off_hours) = match self {
            CadenceSpec::Fixed(cadence) => return cadence.next_after(now),
            CadenceSpec::MarketAware {
                market,
                trading_hours,
                off_hours,
            } => (market, trading_hours, off_hours),
        };

        let mut trading = trading_hours.upcoming(now).peekable();
        let mut off = off_hours.upcoming(now).peekable();

        for _ in 0..MAX_CANDIDATES {
            let order = match (trading.peek(), off.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            };

            let (candidate, from_trading) = match order {
                // 两套表达式同时命中，无论哪套生效都会触发
                Ordering::Equal => {
                    off.next();
                    return trading.next();
                }
                Ordering::Less => (trading.next()?, true),
                Ordering::Greater => (off.next()?, false),
            };

            if market.is_trading_hours(&candidate) == from_trading {
                return Some(candidate);
            }
        }

        self.resolve(now).next_after(now)
    }

    /// 是否区分交易时段
    pub fn is_market_aware(&self) -> bool {
        matches!(self, CadenceSpec::MarketAware { .. })
    }
}

/// 将表达式规范化为 `cron` crate 接受的格式
///
/// 5段表达式补齐秒字段；星期字段中的数字按 Unix 习惯（0/7 为周日）转换为英文缩写，
/// 避免与 `cron` crate 的 1=周日 编号混淆
fn normalize_expression(expression: &str) -> Result<String, ScheduleError> {
    let invalid = |reason: &str| ScheduleError::InvalidCadence {
        expression: expression.to_string(),
        reason: reason.to_string(),
    };

    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 | 7 => {}
        0 => return Err(invalid("表达式为空")),
        n => return Err(invalid(&format!("字段数量应为5-7个，实际为{}个", n))),
    }

    fields[5] = normalize_weekday_field(&fields[5]).ok_or_else(|| invalid("星期字段无效"))?;
    Ok(fields.join(" "))
}

fn normalize_weekday_field(field: &str) -> Option<String> {
    let parts: Option<Vec<String>> = field.split(',').map(normalize_weekday_part).collect();
    parts.map(|p| p.join(","))
}

fn normalize_weekday_part(part: &str) -> Option<String> {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (part, None),
    };

    let base = match base.split_once('-') {
        Some((start, end)) => {
            let start = weekday_token(start)?;
            // 以 7 结尾的区间拆成 "x-Sat,Sun"
            if end.trim() == "7" && step.is_none() {
                return Some(format!("{}-Sat,Sun", start));
            }
            format!("{}-{}", start, weekday_token(end)?)
        }
        None => weekday_token(base)?,
    };

    Some(match step {
        Some(step) => format!("{}/{}", base, step),
        None => base,
    })
}

fn weekday_token(token: &str) -> Option<String> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => Some(WEEKDAY_NAMES[n % 7].to_string()),
        Ok(_) => None,
        Err(_) => Some(token.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate, Timelike, Utc, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_normalize_five_field_expression() {
        assert_eq!(
            normalize_expression("*/2 9-15 * * 1-5").unwrap(),
            "0 */2 9-15 * * Mon-Fri"
        );
        assert_eq!(
            normalize_expression("0 9,12,16 * * 1-5").unwrap(),
            "0 0 9,12,16 * * Mon-Fri"
        );
        assert_eq!(normalize_expression("*/10 * * * *").unwrap(), "0 */10 * * * *");
        assert_eq!(normalize_expression("0 0 * * * 0,6").unwrap(), "0 0 * * * Sun,Sat");
        assert_eq!(normalize_expression("0 0 * * * 5-7").unwrap(), "0 0 * * * Fri-Sat,Sun");
        assert_eq!(normalize_expression("0 0 * * * Mon-Fri").unwrap(), "0 0 * * * Mon-Fri");
    }

    #[test]
    fn test_invalid_expressions_rejected() {
        assert!(CronCadence::parse("").is_err());
        assert!(CronCadence::parse("* * *").is_err());
        assert!(CronCadence::parse("0 0 * * * 9").is_err());
        assert!(CronCadence::parse("not a cron at all x").is_err());
    }

    #[test]
    fn test_weekday_numbering_is_unix_style() {
        let cadence = CronCadence::parse("0 10 * * 1").unwrap();
        // 2024-01-06 是周六，下一次应是 2024-01-08 周一 10:00
        let next = cadence.next_after(&at(2024, 1, 6, 12, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.hour(), 10);
        assert_eq!(next.day(), 8);
    }

    #[test]
    fn test_market_aware_resolution() {
        let spec = CadenceSpec::MarketAware {
            market: Market::Cn,
            trading_hours: CronCadence::parse("*/2 9-15 * * 1-5").unwrap(),
            off_hours: CronCadence::parse("*/10 * * * *").unwrap(),
        };

        let trading = at(2024, 1, 2, 10, 0);
        assert_eq!(spec.resolve(&trading).expression(), "*/2 9-15 * * 1-5");
        assert_eq!(spec.next_fire(&trading).unwrap(), at(2024, 1, 2, 10, 2));

        let lunch = at(2024, 1, 2, 12, 30);
        assert_eq!(spec.resolve(&lunch).expression(), "*/10 * * * *");
        assert_eq!(spec.next_fire(&lunch).unwrap(), at(2024, 1, 2, 12, 40));

        let saturday = at(2024, 1, 6, 10, 0);
        assert_eq!(spec.resolve(&saturday).expression(), "*/10 * * * *");
    }

    #[test]
    fn test_switches_to_trading_cadence_when_window_opens() {
        let spec = CadenceSpec::MarketAware {
            market: Market::Cn,
            trading_hours: CronCadence::parse("*/15 9-17 * * 1-5").unwrap(),
            off_hours: CronCadence::parse("0 */2 * * *").unwrap(),
        };

        // 早盘开盘前和午休期间，低频表达式的下一次触发晚于开盘时刻
        assert_eq!(spec.next_fire(&at(2024, 1, 2, 8, 0)).unwrap(), at(2024, 1, 2, 9, 0));
        assert_eq!(spec.next_fire(&at(2024, 1, 2, 12, 0)).unwrap(), at(2024, 1, 2, 13, 0));
        // 收盘后回到低频表达式
        assert_eq!(spec.next_fire(&at(2024, 1, 2, 15, 0)).unwrap(), at(2024, 1, 2, 16, 0));
        // 周末只使用低频表达式
        assert_eq!(spec.next_fire(&at(2024, 1, 6, 9, 0)).unwrap(), at(2024, 1, 6, 10, 0));
    }

    #[test]
    fn test_fixed_cadence_ignores_market() {
        let spec = CadenceSpec::Fixed(CronCadence::parse("0 0 21,23,1,3 * * *").unwrap());
        assert!(!spec.is_market_aware());
        assert_eq!(
            spec.next_fire(&at(2024, 1, 2, 10, 0)).unwrap(),
            at(2024, 1, 2, 21, 0)
        );
    }
}
