//! 分类注册表
//!
//! 将松散的分类配置校验为类型化的 `CategoryDescriptor` 表，启动时一次性加载

use crate::config::types::CategoryConfig;
use crate::error::ConfigError;
use crate::schedule::cadence::{CadenceSpec, CronCadence};
use crate::schedule::market::Market;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// 分类描述，加载后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryDescriptor {
    /// 分类名称
    pub name: String,
    /// 成员数据源（保持配置顺序）
    pub sources: Vec<String>,
    /// 调度频率
    pub cadence: CadenceSpec,
    /// 优先级，数值越小越优先
    pub priority: u8,
    /// 最大重试次数
    pub retry_count: u32,
    /// 单次尝试超时
    pub timeout: Duration,
}

impl CategoryDescriptor {
    /// 从配置项构建并校验
    pub fn from_config(config: &CategoryConfig) -> Result<Self, ConfigError> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(ConfigError::ValidationError("分类名称不能为空".to_string()));
        }

        let mut seen = HashSet::new();
        let sources: Vec<String> = config
            .sources
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        if sources.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "分类 {} 至少需要一个数据源",
                name
            )));
        }

        if config.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "分类 {} 的超时时间不能为0",
                name
            )));
        }

        let parse = |expr: &str| {
            CronCadence::parse(expr).map_err(|e| {
                ConfigError::ValidationError(format!("分类 {} 的调度表达式无效: {}", name, e))
            })
        };

        // 非交易时段表达式缺省时回落到固定表达式
        let fallback = config.off_hours.as_deref().or(config.schedule.as_deref());
        let cadence = match (config.trading_hours.as_deref(), fallback) {
            (Some(trading), Some(off)) => CadenceSpec::MarketAware {
                market: config.market,
                trading_hours: parse(trading)?,
                off_hours: parse(off)?,
            },
            (None, Some(fixed)) => CadenceSpec::Fixed(parse(fixed)?),
            (Some(_), None) => {
                return Err(ConfigError::ValidationError(format!(
                    "分类 {} 定义了交易时段频率，但缺少非交易时段或固定频率",
                    name
                )))
            }
            (None, None) => {
                return Err(ConfigError::ValidationError(format!(
                    "分类 {} 未定义调度频率",
                    name
                )))
            }
        };

        Ok(Self {
            name: name.to_string(),
            sources,
            cadence,
            priority: config.priority,
            retry_count: config.retry_count,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// 分类所属市场（固定频率的分类没有市场）
    pub fn market(&self) -> Option<Market> {
        match &self.cadence {
            CadenceSpec::MarketAware { market, .. } => Some(*market),
            CadenceSpec::Fixed(_) => None,
        }
    }
}

/// 类型化的分类表，按数据源查找
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
    categories: Vec<Arc<CategoryDescriptor>>,
    by_source: HashMap<String, Arc<CategoryDescriptor>>,
}

impl CategoryTable {
    /// 从配置列表构建分类表
    ///
    /// 分类名重复或任一分类无效时整体拒绝；同一数据源出现在多个分类中时保留第一个
    pub fn from_configs(configs: &[CategoryConfig]) -> Result<Self, ConfigError> {
        let mut table = CategoryTable::default();
        let mut names = HashSet::new();

        for config in configs {
            let descriptor = CategoryDescriptor::from_config(config)?;
            if !names.insert(descriptor.name.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "分类名称重复: {}",
                    descriptor.name
                )));
            }

            let descriptor = Arc::new(descriptor);
            for source in &descriptor.sources {
                match table.by_source.get(source) {
                    Some(existing) => warn!(
                        "数据源 {} 同时属于分类 {} 和 {}，使用 {}",
                        source, existing.name, descriptor.name, existing.name
                    ),
                    None => {
                        table
                            .by_source
                            .insert(source.clone(), Arc::clone(&descriptor));
                    }
                }
            }
            table.categories.push(descriptor);
        }

        Ok(table)
    }

    /// 内置的默认分类表
    pub fn with_defaults() -> Self {
        // 内置配置经过单元测试校验，这里不会失败
        Self::from_configs(&default_categories()).unwrap_or_default()
    }

    /// 按数据源查找分类
    pub fn lookup(&self, source: &str) -> Option<Arc<CategoryDescriptor>> {
        self.by_source.get(source).cloned()
    }

    /// 按配置顺序遍历分类
    pub fn categories(&self) -> impl Iterator<Item = &Arc<CategoryDescriptor>> {
        self.categories.iter()
    }

    /// 分类名称列表
    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }

    /// 按配置顺序列出 (数据源, 分类)，每个数据源只出现一次
    pub fn sources(&self) -> Vec<(String, Arc<CategoryDescriptor>)> {
        let mut out = Vec::with_capacity(self.by_source.len());
        for category in &self.categories {
            for source in &category.sources {
                if let Some(owner) = self.by_source.get(source) {
                    if Arc::ptr_eq(owner, category) {
                        out.push((source.clone(), Arc::clone(owner)));
                    }
                }
            }
        }
        out
    }

    /// 分类数量
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[allow(clippy::too_many_arguments)]
fn category(
    name: &str,
    sources: &[&str],
    market: Market,
    trading_hours: Option<&str>,
    off_hours: Option<&str>,
    schedule: Option<&str>,
    priority: u8,
    retry_count: u32,
    timeout_ms: u64,
) -> CategoryConfig {
    CategoryConfig {
        name: name.to_string(),
        sources: sources.iter().map(|s| s.to_string()).collect(),
        market,
        trading_hours: trading_hours.map(str::to_string),
        off_hours: off_hours.map(str::to_string),
        schedule: schedule.map(str::to_string),
        priority,
        retry_count,
        timeout_ms,
    }
}

/// 内置的默认分类配置
pub fn default_categories() -> Vec<CategoryConfig> {
    vec![
        // 实时快讯：交易时段每2分钟，其余每10分钟
        category(
            "realtime",
            &["cls", "wallstreet", "jin10", "ths", "stcn"],
            Market::Cn,
            Some("*/2 9-15 * * 1-5"),
            Some("*/10 * * * *"),
            None,
            1,
            2,
            10_000,
        ),
        category(
            "hk_realtime",
            &["aastocks", "etnet", "zhitong"],
            Market::Hk,
            Some("*/3 9-16 * * 1-5"),
            Some("*/15 * * * *"),
            None,
            1,
            2,
            15_000,
        ),
        category(
            "northbound",
            &["northbound"],
            Market::Hk,
            Some("*/10 9-16 * * 1-5"),
            Some("0 9,12,16 * * 1-5"),
            None,
            2,
            3,
            10_000,
        ),
        category(
            "official",
            &["cninfo", "hkexnews", "hkex", "sec", "interactive"],
            Market::Cn,
            Some("*/15 9-17 * * 1-5"),
            Some("0 */2 * * *"),
            None,
            2,
            3,
            20_000,
        ),
        category(
            "social",
            &["xueqiu", "weibo", "guba", "taoguba"],
            Market::Cn,
            Some("*/5 9-15 * * 1-5"),
            Some("*/30 * * * *"),
            None,
            3,
            2,
            15_000,
        ),
        // 研报：工作日每2小时
        category(
            "research",
            &["eastmoney_report", "fxbaogao", "yanbaoke", "seekingalpha"],
            Market::Default,
            None,
            None,
            Some("0 9-18/2 * * 1-5"),
            4,
            2,
            30_000,
        ),
        // 视觉采集资源消耗大，每4小时
        category(
            "visual",
            &["toutiao", "wechat", "xiaohongshu"],
            Market::Default,
            None,
            None,
            Some("0 9-22/4 * * *"),
            5,
            1,
            60_000,
        ),
        category(
            "overseas",
            &["yahoo", "seekingalpha", "globalMedia"],
            Market::Us,
            None,
            None,
            Some("0 21,23,1,3 * * *"),
            3,
            2,
            20_000,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, sources: &[&str]) -> CategoryConfig {
        category(
            name,
            sources,
            Market::Cn,
            Some("*/2 9-15 * * 1-5"),
            Some("*/10 * * * *"),
            None,
            1,
            2,
            10_000,
        )
    }

    #[test]
    fn test_default_categories_are_valid() {
        let table = CategoryTable::from_configs(&default_categories()).unwrap();
        assert_eq!(table.len(), 8);
        assert_eq!(
            table.category_names(),
            vec![
                "realtime",
                "hk_realtime",
                "northbound",
                "official",
                "social",
                "research",
                "visual",
                "overseas"
            ]
        );

        let realtime = table.lookup("cls").unwrap();
        assert_eq!(realtime.name, "realtime");
        assert_eq!(realtime.retry_count, 2);
        assert_eq!(realtime.timeout, Duration::from_millis(10_000));
        assert_eq!(realtime.market(), Some(Market::Cn));

        assert!(table.lookup("unknown").is_none());
    }

    #[test]
    fn test_duplicate_source_keeps_first_category() {
        let table = CategoryTable::with_defaults();
        // seekingalpha 同时出现在 research 和 overseas 中
        assert_eq!(table.lookup("seekingalpha").unwrap().name, "research");

        let sources = table.sources();
        let count = sources.iter().filter(|(s, _)| s == "seekingalpha").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_trading_hours_with_fixed_schedule_fallback() {
        let mut cfg = config("mixed", &["a"]);
        cfg.off_hours = None;
        cfg.schedule = Some("0 * * * *".to_string());

        let descriptor = CategoryDescriptor::from_config(&cfg).unwrap();
        match descriptor.cadence {
            CadenceSpec::MarketAware { off_hours, .. } => {
                assert_eq!(off_hours.expression(), "0 * * * *")
            }
            other => panic!("unexpected cadence: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_categories_rejected() {
        let mut no_cadence = config("broken", &["a"]);
        no_cadence.trading_hours = None;
        no_cadence.off_hours = None;
        assert!(CategoryDescriptor::from_config(&no_cadence).is_err());

        let mut only_trading = config("broken", &["a"]);
        only_trading.off_hours = None;
        assert!(CategoryDescriptor::from_config(&only_trading).is_err());

        let mut bad_cron = config("broken", &["a"]);
        bad_cron.off_hours = Some("every five minutes".to_string());
        let err = CategoryDescriptor::from_config(&bad_cron).unwrap_err();
        assert!(err.to_string().contains("broken"));

        let empty = config("empty", &[" ", ""]);
        assert!(CategoryDescriptor::from_config(&empty).is_err());

        let mut zero_timeout = config("zero", &["a"]);
        zero_timeout.timeout_ms = 0;
        assert!(CategoryDescriptor::from_config(&zero_timeout).is_err());
    }

    #[test]
    fn test_duplicate_category_name_rejected() {
        let result = CategoryTable::from_configs(&[config("dup", &["a"]), config("dup", &["b"])]);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("分类名称重复"));
    }
}
