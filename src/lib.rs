// Cloud Mirror Rust Library
// 远端文件夹镜像下载核心库

// 🔥 公共模块（速度统计、低速检测）
pub mod common;

// 配置管理模块
pub mod config;

// 下载引擎模块
pub mod downloader;

// 错误类型
pub mod error;

// 下载事件
pub mod events;

// 日志系统
pub mod logging;

// 远端目录与下载链接
pub mod remote;

// 内存实体存储
pub mod store;

// 导出常用类型
pub use config::AppConfig;
pub use downloader::{
    ChunkedDownloader, DownloadLink, DownloadScheduler, DownloadStatus, Group, GroupState, Item,
    SchedulerConfig,
};
pub use error::{DownloadError, ErrorKind};
pub use events::{BroadcastEventSink, DownloadEvent, EventSink, NoopEventSink};
pub use remote::{ManifestSource, RemoteClient, TreeWalker};
pub use store::DownloadStore;
