//! 市场交易时段判断
//!
//! 交易时段按本地时钟的小时判断，周末一律休市

use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 市场枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// A股
    Cn,
    /// 港股
    Hk,
    /// 美股（按北京时间）
    Us,
    /// 默认市场 09:00-17:00
    #[serde(other)]
    Default,
}

impl Default for Market {
    fn default() -> Self {
        Market::Default
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Cn => write!(f, "cn"),
            Market::Hk => write!(f, "hk"),
            Market::Us => write!(f, "us"),
            Market::Default => write!(f, "default"),
        }
    }
}

impl FromStr for Market {
    type Err = std::convert::Infallible;

    /// 未知市场名回落到默认市场
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "cn" => Market::Cn,
            "hk" => Market::Hk,
            "us" => Market::Us,
            _ => Market::Default,
        })
    }
}

impl Market {
    /// 状态报告中列出的市场
    pub const REPORTED: [Market; 3] = [Market::Cn, Market::Hk, Market::Us];

    /// 判断给定时刻是否处于该市场的交易时段
    pub fn is_trading_hours<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }

        let hour = now.hour();
        match self {
            Market::Cn => (9..12).contains(&hour) || (13..15).contains(&hour),
            Market::Hk => (9..12).contains(&hour) || (13..16).contains(&hour),
            // 跨越午夜
            Market::Us => hour >= 21 || hour < 4,
            Market::Default => (9..17).contains(&hour),
        }
    }
}

/// 便捷函数，等价于 `market.is_trading_hours(now)`
pub fn is_trading_hours<Tz: TimeZone>(market: Market, now: &DateTime<Tz>) -> bool {
    market.is_trading_hours(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_cn_trading_window() {
        // 2024-01-02 是周二，2024-01-06 是周六
        assert!(is_trading_hours(Market::Cn, &at(2024, 1, 2, 10, 0)));
        assert!(!is_trading_hours(Market::Cn, &at(2024, 1, 6, 10, 0)));
        assert!(!is_trading_hours(Market::Cn, &at(2024, 1, 2, 12, 30)));
        assert!(is_trading_hours(Market::Cn, &at(2024, 1, 2, 14, 59)));
        assert!(!is_trading_hours(Market::Cn, &at(2024, 1, 2, 15, 0)));
    }

    #[test]
    fn test_hk_closes_later_than_cn() {
        let tuesday_1530 = at(2024, 1, 2, 15, 30);
        assert!(Market::Hk.is_trading_hours(&tuesday_1530));
        assert!(!Market::Cn.is_trading_hours(&tuesday_1530));
        assert!(!Market::Hk.is_trading_hours(&at(2024, 1, 2, 16, 0)));
    }

    #[test]
    fn test_us_window_wraps_midnight() {
        assert!(Market::Us.is_trading_hours(&at(2024, 1, 2, 22, 0)));
        assert!(Market::Us.is_trading_hours(&at(2024, 1, 3, 0, 30)));
        assert!(Market::Us.is_trading_hours(&at(2024, 1, 3, 3, 59)));
        assert!(!Market::Us.is_trading_hours(&at(2024, 1, 3, 4, 0)));
        assert!(!Market::Us.is_trading_hours(&at(2024, 1, 2, 12, 0)));
        // 周六凌晨同样休市
        assert!(!Market::Us.is_trading_hours(&at(2024, 1, 6, 1, 0)));
    }

    #[test]
    fn test_default_market_window() {
        assert!(Market::Default.is_trading_hours(&at(2024, 1, 2, 9, 0)));
        assert!(Market::Default.is_trading_hours(&at(2024, 1, 2, 16, 59)));
        assert!(!Market::Default.is_trading_hours(&at(2024, 1, 2, 17, 0)));
        assert!(!Market::Default.is_trading_hours(&at(2024, 1, 7, 10, 0)));
    }

    #[test]
    fn test_market_parsing() {
        assert_eq!("CN".parse::<Market>().unwrap(), Market::Cn);
        assert_eq!("hk".parse::<Market>().unwrap(), Market::Hk);
        assert_eq!("nyse".parse::<Market>().unwrap(), Market::Default);

        let parsed: Market = serde_json::from_str("\"us\"").unwrap();
        assert_eq!(parsed, Market::Us);
        let fallback: Market = serde_json::from_str("\"lse\"").unwrap();
        assert_eq!(fallback, Market::Default);
    }
}
