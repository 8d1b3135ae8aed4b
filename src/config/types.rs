//! 配置数据结构定义
//!
//! 定义全局配置、分类配置以及加载后的校验逻辑

use crate::schedule::market::Market;
use crate::schedule::registry::{default_categories, CategoryTable};
use serde::{Deserialize, Serialize};

/// 主配置结构，包含全局配置和分类列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 分类配置列表，缺省时使用内置分类
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            categories: default_categories(),
        }
    }
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 重试退避基数（毫秒），第 n 次重试前等待 n 倍
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// 传给采集器的最大条目数
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// 需要走代理的数据源
    #[serde(default = "default_sensitive_sources")]
    pub sensitive_sources: Vec<String>,
    /// 内联代理列表（逗号分隔）
    pub proxies: Option<String>,
    /// 读取代理列表的环境变量，按顺序取第一个非空值
    #[serde(default = "default_proxy_env_vars")]
    pub proxy_env_vars: Vec<String>,
    /// 代理探测地址
    #[serde(default = "default_proxy_probe_url")]
    pub proxy_probe_url: String,
    /// 代理探测超时（秒）
    #[serde(default = "default_proxy_probe_timeout")]
    pub proxy_probe_timeout_seconds: u64,
    /// 代理巡检间隔（秒），不配置则不巡检
    pub proxy_check_interval_seconds: Option<u64>,
    /// 监控快照文件路径
    pub snapshot_path: Option<String>,
    /// 快照间隔（秒），需要同时配置快照路径
    pub snapshot_interval_seconds: Option<u64>,
    /// 飞书 webhook URL
    pub feishu_webhook_url: Option<String>,
    /// 告警消息模板（handlebars）
    pub alert_template: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backoff_base_ms: default_backoff_base_ms(),
            max_items: default_max_items(),
            sensitive_sources: default_sensitive_sources(),
            proxies: None,
            proxy_env_vars: default_proxy_env_vars(),
            proxy_probe_url: default_proxy_probe_url(),
            proxy_probe_timeout_seconds: default_proxy_probe_timeout(),
            proxy_check_interval_seconds: None,
            snapshot_path: None,
            snapshot_interval_seconds: None,
            feishu_webhook_url: None,
            alert_template: None,
        }
    }
}

/// 分类配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryConfig {
    /// 分类名称
    pub name: String,
    /// 成员数据源
    pub sources: Vec<String>,
    /// 所属市场
    #[serde(default)]
    pub market: Market,
    /// 交易时段频率
    pub trading_hours: Option<String>,
    /// 非交易时段频率
    pub off_hours: Option<String>,
    /// 固定频率
    pub schedule: Option<String>,
    /// 优先级
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// 最大重试次数
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// 单次尝试超时（毫秒）
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_backoff_base_ms() -> u64 {
    2000
}
fn default_max_items() -> usize {
    30
}
fn default_sensitive_sources() -> Vec<String> {
    ["xueqiu", "toutiao", "xiaohongshu", "weibo", "seekingalpha", "guba"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_proxy_env_vars() -> Vec<String> {
    vec!["HTTP_PROXIES".to_string(), "PROXY_LIST".to_string()]
}
fn default_proxy_probe_url() -> String {
    "https://httpbin.org/ip".to_string()
}
fn default_proxy_probe_timeout() -> u64 {
    10
}
fn default_priority() -> u8 {
    5
}
fn default_retry_count() -> u32 {
    2
}
fn default_timeout_ms() -> u64 {
    15_000
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&config.global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            config.global.log_level, valid_log_levels
        ));
    }

    if config.global.proxy_probe_timeout_seconds == 0 {
        return Err("代理探测超时不能为0".to_string());
    }

    if !config.global.proxy_probe_url.starts_with("http://")
        && !config.global.proxy_probe_url.starts_with("https://")
    {
        return Err(format!(
            "代理探测地址格式无效: {}",
            config.global.proxy_probe_url
        ));
    }

    if config.global.proxy_check_interval_seconds == Some(0) {
        return Err("代理巡检间隔不能为0".to_string());
    }

    if config.global.snapshot_interval_seconds == Some(0) {
        return Err("快照间隔不能为0".to_string());
    }

    if config.global.snapshot_interval_seconds.is_some() && config.global.snapshot_path.is_none()
    {
        return Err("配置了快照间隔但缺少快照路径".to_string());
    }

    if let Some(ref url) = config.global.feishu_webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err("飞书webhook URL格式无效".to_string());
        }
    }

    if config.categories.is_empty() {
        return Err("至少需要配置一个分类".to_string());
    }

    // 分类表的构建同时完成表达式与重复项校验
    CategoryTable::from_configs(&config.categories).map_err(|e| e.to_string())?;

    Ok(())
}
