use anyhow::Context;
use cloud_mirror_rust::{
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    logging, BroadcastEventSink, DownloadEvent, DownloadScheduler, DownloadStatus, DownloadStore,
    ManifestSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, trace, warn};

/// 加载日志配置
///
/// 在日志系统初始化之前读取，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(DEFAULT_CONFIG_PATH).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

/// 把状态类事件写入日志
async fn log_events(mut rx: broadcast::Receiver<DownloadEvent>) {
    loop {
        match rx.recv().await {
            Ok(DownloadEvent::GroupStatusChanged { group_id, new_status, .. }) => {
                info!("组 {} 状态: {:?}", group_id, new_status);
            }
            Ok(DownloadEvent::ItemStatusChanged { item_id, new_status, error: Some(e), .. }) => {
                warn!("文件 {} 状态: {:?}, 错误: {}", item_id, new_status, e);
            }
            Ok(DownloadEvent::ItemStatusChanged { item_id, new_status, .. }) => {
                info!("文件 {} 状态: {:?}", item_id, new_status);
            }
            Ok(event) => trace!(
                "事件 {}: 组 {:?}, 文件 {:?}",
                event.event_type_name(),
                event.group_id(),
                event.item_id()
            ),
            Err(RecvError::Lagged(n)) => warn!("事件消费过慢，丢弃 {} 条", n),
            Err(RecvError::Closed) => return,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_config = load_log_config().await;
    let _log_guard = logging::init_logging(&log_config);

    info!("Cloud Mirror v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let manifest_path = std::env::args()
        .nth(1)
        .context("用法: cloud-mirror <manifest.json>")?;

    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;
    config.download.validate()?;

    let source = Arc::new(ManifestSource::load(&manifest_path).await?);
    let events = Arc::new(BroadcastEventSink::new(1024));
    tokio::spawn(log_events(events.subscribe()));

    let scheduler = DownloadScheduler::new(
        config.download.to_scheduler_config(),
        DownloadStore::new(),
        source.clone(),
        source.clone(),
        events,
    )?;

    for folder_id in source.folder_ids() {
        let save_at = config.download.download_dir.join(&folder_id);
        if let Err(e) = scheduler.request_folder(&folder_id, save_at).await {
            error!("文件夹 {} 加入下载失败: {}", folder_id, e);
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到 Ctrl+C，暂停所有下载...");
                break;
            }
            _ = ticker.tick() => {
                let stats = scheduler.stats();
                info!(
                    "📊 速度 {:.1} KB/s, 累计 {:.1} MB",
                    stats.speed / 1024.0,
                    stats.lifetime_bytes as f64 / 1024.0 / 1024.0
                );
                let groups = scheduler.groups();
                if groups.iter().all(|g| g.status.is_terminal()) {
                    break;
                }
            }
        }
    }

    scheduler.shutdown().await;

    let mut failed = 0;
    for group in scheduler.groups() {
        let progress = scheduler.group_progress(&group.id).unwrap_or_default();
        info!(
            "组 {} ({}): {:?}, {}/{} 个文件, {:.1}%",
            group.name,
            group.id,
            group.status,
            progress.completed_items,
            progress.total_items,
            progress.percent()
        );
        if group.status == DownloadStatus::Error {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} 个文件夹下载失败", failed);
    }
    info!("✅ 全部完成");
    Ok(())
}
