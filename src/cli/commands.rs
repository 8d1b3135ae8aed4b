//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{Config, ConfigLoader, TomlConfigLoader};
use crate::error::{ConfigError, Result};
use crate::monitor::{format_uptime, HealthMonitor, JsonFileStore, MonitorStatus, SnapshotStore};
use crate::notification::{FeishuSender, MessageType, NotificationMessage, NotificationSender};
use crate::proxy::{ProxyPool, ProxyPoolStatus};
use crate::schedule::{CategoryTable, Market};
use async_trait::async_trait;
use chrono::Local;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 按命令行参数加载配置，未指定且默认路径不存在时使用内置配置
pub async fn load_config(args: &Args) -> Result<Config> {
    let loader = TomlConfigLoader::new(true);
    let config = loader.load_or_default(args.config.as_deref()).await?;
    loader.validate(&config)?;
    Ok(config)
}

/// 为子命令选择处理器
pub fn command_for(command: &Commands) -> Box<dyn Command> {
    match command {
        Commands::Validate => Box::new(ValidateCommand),
        Commands::Cadence { .. } => Box::new(CadenceCommand),
        Commands::Proxies => Box::new(ProxiesCommand),
        Commands::Status { .. } => Box::new(StatusCommand),
        Commands::TestNotification { .. } => Box::new(TestNotificationCommand),
        Commands::Version => Box::new(VersionCommand),
    }
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        match args.format {
            OutputFormat::Json => {
                let version_info = json!({
                    "name": crate::APP_NAME,
                    "version": crate::VERSION,
                    "description": crate::APP_DESCRIPTION
                });
                println!("{}", serde_json::to_string_pretty(&version_info)?);
            }
            OutputFormat::Text => {
                println!("{} v{}", crate::APP_NAME, crate::VERSION);
                println!("{}", crate::APP_DESCRIPTION);
            }
        }
        Ok(())
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config = load_config(args).await?;
        let table = CategoryTable::from_configs(&config.categories)?;

        match args.format {
            OutputFormat::Json => {
                let categories: Vec<_> = table
                    .categories()
                    .map(|c| {
                        json!({
                            "name": c.name,
                            "sources": c.sources,
                            "market": c.market().map(|m| m.to_string()),
                            "priority": c.priority,
                            "retryCount": c.retry_count,
                            "timeoutMs": c.timeout.as_millis() as u64,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&categories)?);
            }
            OutputFormat::Text => {
                println!("✓ 配置文件验证通过");
                println!("✓ 找到 {} 个分类，{} 个数据源", table.len(), table.sources().len());
                println!();
                println!(
                    "{:<14} {:<8} {:<6} {:<6} {:<10} 数据源",
                    "分类", "市场", "优先级", "重试", "超时(ms)"
                );
                println!("{}", "-".repeat(80));
                for category in table.categories() {
                    println!(
                        "{:<14} {:<8} {:<6} {:<6} {:<10} {}",
                        category.name,
                        category
                            .market()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        category.priority,
                        category.retry_count,
                        category.timeout.as_millis(),
                        category.sources.join(", ")
                    );
                }
            }
        }
        Ok(())
    }
}

/// 调度频率命令
pub struct CadenceCommand;

#[async_trait]
impl Command for CadenceCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Cadence { source } = &args.command else {
            return Ok(());
        };

        let config = load_config(args).await?;
        let table = CategoryTable::from_configs(&config.categories)?;
        let now = Local::now();

        let mut rows = Vec::new();
        for (name, category) in table.sources() {
            if source.as_deref().is_some_and(|s| s != name) {
                continue;
            }
            let cadence = category.cadence.resolve(&now);
            rows.push((
                name,
                category.name.clone(),
                cadence.expression().to_string(),
                category.cadence.next_fire(&now),
            ));
        }

        if let Some(name) = source {
            if rows.is_empty() {
                return Err(ConfigError::ValidationError(format!("未知的数据源: {}", name)).into());
            }
        }

        match args.format {
            OutputFormat::Json => {
                let markets: serde_json::Map<_, _> = Market::REPORTED
                    .iter()
                    .map(|m| (m.to_string(), json!(m.is_trading_hours(&now))))
                    .collect();
                let sources: Vec<_> = rows
                    .iter()
                    .map(|(name, category, expression, next)| {
                        json!({
                            "source": name,
                            "category": category,
                            "cadence": expression,
                            "nextFire": next,
                        })
                    })
                    .collect();
                let output = json!({
                    "now": now,
                    "isTradingHours": markets,
                    "sources": sources,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                println!("当前时间: {}", now.format("%Y-%m-%d %H:%M:%S"));
                for market in Market::REPORTED {
                    let state = if market.is_trading_hours(&now) {
                        "交易中"
                    } else {
                        "休市"
                    };
                    println!("  {:<4} {}", market, state);
                }
                println!();
                println!(
                    "{:<18} {:<14} {:<22} 下次触发",
                    "数据源", "分类", "调度表达式"
                );
                println!("{}", "-".repeat(80));
                for (name, category, expression, next) in rows {
                    let next = next
                        .map(|t| t.format("%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:<18} {:<14} {:<22} {}", name, category, expression, next);
                }
            }
        }
        Ok(())
    }
}

/// 代理池命令
pub struct ProxiesCommand;

#[async_trait]
impl Command for ProxiesCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config = load_config(args).await?;
        let pool = ProxyPool::from_config(&config.global).await;
        if pool.is_empty().await {
            println!("未配置代理");
            return Ok(());
        }

        let summary = pool.probe_all().await;
        let status = pool.status().await;

        match args.format {
            OutputFormat::Json => {
                let output = json!({
                    "probe": summary,
                    "status": status,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                println!(
                    "探测完成: {} 个代理，{} 个可用，{} 个不可用",
                    summary.total, summary.healthy, summary.unhealthy
                );
                print_pool_status(&status);
            }
        }
        Ok(())
    }
}

fn print_pool_status(status: &ProxyPoolStatus) {
    println!(
        "总数 {} / 健康 {} / 不健康 {} / 失效 {} / 未知 {}",
        status.total, status.healthy, status.unhealthy, status.dead, status.unknown
    );
    println!("敏感数据源: {}", status.sensitive_sources.join(", "));
    println!();
    println!(
        "{:<32} {:<10} {:<8} {:<8} {:<8} 成功率",
        "代理", "状态", "使用", "成功", "失败"
    );
    println!("{}", "-".repeat(80));
    for proxy in &status.proxies {
        let rate = proxy
            .success_rate
            .map(|r| format!("{:.1}%", r))
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "{:<32} {:<10} {:<8} {:<8} {:<8} {}",
            proxy.id, proxy.status, proxy.usage_count, proxy.success_count, proxy.fail_count, rate
        );
    }
}

/// 监控状态命令
pub struct StatusCommand;

#[async_trait]
impl Command for StatusCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Status { snapshot } = &args.command else {
            return Ok(());
        };

        let path = match snapshot {
            Some(path) => path.clone(),
            None => {
                let config = load_config(args).await?;
                config.global.snapshot_path.map(PathBuf::from).ok_or_else(|| {
                    ConfigError::ValidationError(
                        "未指定快照文件，请使用 --snapshot 或配置 snapshot_path".to_string(),
                    )
                })?
            }
        };

        let store = JsonFileStore::new(&path);
        let Some(saved) = store.load()? else {
            println!("快照文件不存在: {}", path.display());
            return Ok(());
        };
        let started = saved.start_time;

        let monitor = HealthMonitor::new();
        monitor.restore(saved).await;
        let mut status = monitor.status().await;
        if let Some(started) = started {
            let uptime = (Local::now() - started).to_std().unwrap_or_default();
            status.uptime = format_uptime(uptime);
        }

        match args.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Text => print_monitor_status(&status),
        }
        Ok(())
    }
}

fn print_monitor_status(status: &MonitorStatus) {
    println!("运行时长: {}", status.uptime);
    println!("整体状态: {}", status.overall_health);
    println!("数据源数量: {}", status.sources_count);
    println!();
    println!(
        "{:<18} {:<10} {:<8} {:<8} {:<8} {:<10} 最近错误",
        "数据源", "状态", "成功率", "成功", "失败", "平均耗时"
    );
    println!("{}", "-".repeat(90));
    for summary in status.sources.values() {
        let last_error = summary
            .last_error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("");
        println!(
            "{:<18} {:<10} {:<8} {:<8} {:<8} {:<10} {}",
            summary.name,
            summary.status,
            format!("{}%", summary.success_rate),
            summary.success_count,
            summary.fail_count,
            format!("{}ms", summary.avg_duration),
            last_error
        );
    }

    if !status.recent_alerts.is_empty() {
        println!();
        println!("最近告警:");
        for alert in &status.recent_alerts {
            println!(
                "  [{}] {} {} {}{}",
                alert.time.format("%m-%d %H:%M:%S"),
                alert.source,
                alert.kind,
                alert.message,
                if alert.acknowledged { " (已确认)" } else { "" }
            );
        }
    }
}

/// 测试通知命令
pub struct TestNotificationCommand;

#[async_trait]
impl Command for TestNotificationCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::TestNotification { message } = &args.command else {
            return Ok(());
        };

        let config = load_config(args).await?;
        let webhook_url = config.global.feishu_webhook_url.as_deref().ok_or_else(|| {
            ConfigError::ValidationError("未配置 feishu_webhook_url".to_string())
        })?;
        let sender: Arc<dyn NotificationSender> = Arc::new(FeishuSender::new(
            webhook_url,
            config.global.alert_template.as_deref(),
        )?);

        match message {
            Some(content) => {
                sender
                    .send_message(&NotificationMessage {
                        title: "测试通知".to_string(),
                        content: content.clone(),
                        message_type: MessageType::Info,
                    })
                    .await?
            }
            None => sender.test_connection().await?,
        }

        println!("✓ 测试通知发送成功");
        Ok(())
    }
}
