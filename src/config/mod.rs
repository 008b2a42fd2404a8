// 配置管理模块

use crate::common::StallConfig;
use crate::downloader::{DownloaderConfig, SchedulerConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 默认下载目录
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// 分片大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 每个文件的下载线程数
    #[serde(default = "default_workers_per_file")]
    pub workers_per_file: usize,
    /// 大文件阈值（字节），达到该大小的文件占用大文件并发名额
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,
    /// 最大同时下载的组数
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,
    /// 最大同时下载的小文件数
    #[serde(default = "default_max_concurrent_small")]
    pub max_concurrent_small: usize,
    /// 最大同时下载的大文件数
    #[serde(default = "default_max_concurrent_large")]
    pub max_concurrent_large: usize,
    /// 单个分片的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试退避基数（毫秒）
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// 进度事件间隔（毫秒）
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// 读超时（秒）：等待响应头或两个数据块之间的最长时间
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// 下载完成后是否计算 CRC32
    #[serde(default = "default_verify_checksum")]
    pub verify_checksum: bool,
    /// 性能监控配置
    #[serde(default)]
    pub performance: PerformanceConfig,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_chunk_size() -> u64 {
    4 * 1024 * 1024
}
fn default_workers_per_file() -> usize {
    4
}
fn default_large_file_threshold() -> u64 {
    64 * 1024 * 1024
}
fn default_max_concurrent_groups() -> usize {
    2
}
fn default_max_concurrent_small() -> usize {
    4
}
fn default_max_concurrent_large() -> usize {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_progress_interval_ms() -> u64 {
    1000
}
fn default_read_timeout_secs() -> u64 {
    60
}
fn default_verify_checksum() -> bool {
    true
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            chunk_size: default_chunk_size(),
            workers_per_file: default_workers_per_file(),
            large_file_threshold: default_large_file_threshold(),
            max_concurrent_groups: default_max_concurrent_groups(),
            max_concurrent_small: default_max_concurrent_small(),
            max_concurrent_large: default_max_concurrent_large(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            read_timeout_secs: default_read_timeout_secs(),
            verify_checksum: default_verify_checksum(),
            performance: PerformanceConfig::default(),
        }
    }
}

/// 性能监控配置
///
/// 下载速度在 `stall_duration_secs` 内持续低于 `min_speed_kbps` 时，
/// 下载器先重启一次所有 Worker，再次发生则判定该文件失败。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// 是否启用性能监控
    #[serde(default = "default_performance_enabled")]
    pub enabled: bool,
    /// 检查间隔（秒），默认5秒
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// 最低速度（KB/s），默认10 KB/s
    #[serde(default = "default_min_speed_kbps")]
    pub min_speed_kbps: u64,
    /// 低速持续时长（秒），默认30秒
    #[serde(default = "default_stall_duration_secs")]
    pub stall_duration_secs: u64,
    /// 启动延迟（秒），下载开始后多久开始检测，默认10秒
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
}

fn default_performance_enabled() -> bool {
    false
}
fn default_check_interval_secs() -> u64 {
    5
}
fn default_min_speed_kbps() -> u64 {
    10
}
fn default_stall_duration_secs() -> u64 {
    30
}
fn default_startup_delay_secs() -> u64 {
    10
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_performance_enabled(),
            check_interval_secs: default_check_interval_secs(),
            min_speed_kbps: default_min_speed_kbps(),
            stall_duration_secs: default_stall_duration_secs(),
            startup_delay_secs: default_startup_delay_secs(),
        }
    }
}

impl PerformanceConfig {
    /// 转换为低速检测配置，未启用时返回 None
    pub fn to_stall_config(&self) -> Option<StallConfig> {
        if !self.enabled {
            return None;
        }
        Some(StallConfig {
            check_interval_secs: self.check_interval_secs.max(1),
            min_speed: self.min_speed_kbps.saturating_mul(1024),
            duration_threshold_secs: self.stall_duration_secs,
            startup_delay_secs: self.startup_delay_secs,
        })
    }
}

impl DownloadConfig {
    /// 检查配置取值
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("分片大小不能为 0");
        }
        if self.workers_per_file == 0 {
            anyhow::bail!("每个文件的下载线程数不能为 0");
        }
        if self.max_concurrent_groups == 0
            || self.max_concurrent_small == 0
            || self.max_concurrent_large == 0
        {
            anyhow::bail!(
                "并发数必须大于 0 (组={}, 小文件={}, 大文件={})",
                self.max_concurrent_groups,
                self.max_concurrent_small,
                self.max_concurrent_large
            );
        }
        if self.progress_interval_ms == 0 {
            anyhow::bail!("进度事件间隔不能为 0");
        }
        if self.read_timeout_secs == 0 {
            anyhow::bail!("读超时不能为 0");
        }
        if self.performance.enabled && self.performance.check_interval_secs == 0 {
            anyhow::bail!("性能监控检查间隔不能为 0");
        }
        Ok(())
    }

    pub fn to_downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            chunk_size: self.chunk_size,
            workers: self.workers_per_file,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            verify_checksum: self.verify_checksum,
            stall: self.performance.to_stall_config(),
        }
    }

    /// 转换为调度器运行参数
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_groups: self.max_concurrent_groups,
            max_concurrent_small: self.max_concurrent_small,
            max_concurrent_large: self.max_concurrent_large,
            large_file_threshold: self.large_file_threshold,
            stats_interval: Duration::from_millis(self.progress_interval_ms),
            downloader: self.to_downloader_config(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .download
            .validate()
            .context("配置文件中的下载参数验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.download
            .validate()
            .context("保存配置失败：下载参数无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 尝试保存默认配置
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {:#}", e);
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.download.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.download.workers_per_file, 4);
        assert_eq!(config.download.max_concurrent_groups, 2);
        assert!(config.download.validate().is_ok());
        assert!(!config.download.performance.enabled);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("app.toml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.download.workers_per_file = 8;
        config.download.performance.enabled = true;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.download.workers_per_file, 8);
        assert!(loaded.download.performance.enabled);
        assert_eq!(loaded.log.level, "info");
    }

    #[tokio::test]
    async fn test_load_or_default_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await;
        assert_eq!(config.download.max_retries, 3);
        assert!(std::path::Path::new(path).exists());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [download]
            chunk_size = 1048576
            max_concurrent_large = 1

            [download.performance]
            enabled = true
            min_speed_kbps = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.download.chunk_size, 1024 * 1024);
        assert_eq!(config.download.max_concurrent_large, 1);
        assert_eq!(config.download.max_concurrent_small, 4);
        assert_eq!(config.download.performance.stall_duration_secs, 30);
        assert_eq!(config.log.retention_days, 7);
    }

    #[test]
    fn test_config_validation() {
        let mut config = DownloadConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = DownloadConfig::default();
        config.max_concurrent_small = 0;
        assert!(config.validate().is_err());

        let mut config = DownloadConfig::default();
        config.workers_per_file = 0;
        assert!(config.validate().is_err());

        let mut config = DownloadConfig::default();
        config.read_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_scheduler_config() {
        let mut config = DownloadConfig::default();
        config.retry_backoff_ms = 250;
        config.performance.enabled = true;
        config.performance.min_speed_kbps = 100;

        let scheduler = config.to_scheduler_config();
        assert_eq!(scheduler.max_concurrent_small, 4);
        assert_eq!(scheduler.large_file_threshold, 64 * 1024 * 1024);
        assert_eq!(scheduler.stats_interval, Duration::from_secs(1));
        assert_eq!(scheduler.downloader.retry_backoff, Duration::from_millis(250));
        assert_eq!(scheduler.downloader.read_timeout, Duration::from_secs(60));

        let stall = scheduler.downloader.stall.unwrap();
        assert_eq!(stall.min_speed, 100 * 1024);
        assert_eq!(stall.duration_threshold_secs, 30);
    }

    #[test]
    fn test_performance_disabled_has_no_stall_config() {
        assert!(PerformanceConfig::default().to_stall_config().is_none());
    }
}
