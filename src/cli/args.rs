//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Collector Vitals - 采集任务调度与容错工具
#[derive(Parser, Debug, Clone)]
#[command(
    name = "collector-vitals",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        env = "COLLECTOR_VITALS_CONFIG"
    )]
    pub config: Option<PathBuf>,

    /// 日志级别，未指定时使用配置文件中的设置
    #[arg(
        short,
        long,
        value_enum,
        help = "日志级别",
        env = "COLLECTOR_VITALS_LOG_LEVEL"
    )]
    pub log_level: Option<LogLevel>,

    /// 输出格式
    #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
    pub format: OutputFormat,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// 输出格式
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本表格
    Text,
    /// JSON
    Json,
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 校验配置文件并打印分类表
    Validate,

    /// 打印各市场交易时段及各数据源当前生效的调度表达式
    Cadence {
        /// 只显示指定数据源
        #[arg(short, long, value_name = "SOURCE")]
        source: Option<String>,
    },

    /// 加载并探测代理池
    Proxies,

    /// 读取监控快照并打印健康报告
    Status {
        /// 快照文件路径，默认使用配置中的 snapshot_path
        #[arg(short, long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },

    /// 发送测试通知
    TestNotification {
        /// 自定义消息内容
        #[arg(short, long)]
        message: Option<String>,
    },

    /// 显示版本信息
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxies_command() {
        let args = Args::parse_from(["collector-vitals", "-f", "json", "proxies"]);
        assert_eq!(args.format, OutputFormat::Json);
        assert!(matches!(args.command, Commands::Proxies));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_parse_status_with_snapshot() {
        let args = Args::parse_from([
            "collector-vitals",
            "--log-level",
            "debug",
            "status",
            "--snapshot",
            "logs/monitor.json",
        ]);
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        match args.command {
            Commands::Status { snapshot } => {
                assert_eq!(snapshot, Some(PathBuf::from("logs/monitor.json")))
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
