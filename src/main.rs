//! Collector Vitals 主程序入口
//!
//! 配置校验、调度预览、代理池巡检和监控快照查看

use anyhow::{Context, Result};
use clap::Parser;
use collector_vitals::cli::{command_for, load_config, Args};
use collector_vitals::logging::{LogConfig, LoggingSystem};
use tracing::{debug, error};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 命令行级别优先，其次是配置文件中的级别
    let log_config = match args.log_level {
        Some(level) => LogConfig {
            level: level.into(),
            ..Default::default()
        },
        None => match load_config(&args).await {
            Ok(config) => LogConfig::with_level_str(&config.global.log_level),
            Err(_) => LogConfig::default(),
        },
    };
    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    debug!("{} v{} 启动", collector_vitals::APP_NAME, collector_vitals::VERSION);

    if let Err(e) = command_for(&args.command).execute(&args).await {
        error!("命令执行失败: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
