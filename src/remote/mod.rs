//! 远端存储接口
//!
//! 目录遍历与下载链接解析由外部实现，核心只依赖这里的 trait。

mod manifest;

pub use manifest::{Manifest, ManifestFile, ManifestFolder, ManifestSource};

use crate::downloader::{DownloadLink, Item};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 遍历得到的一个远端文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub file_id: String,
    pub name: String,
    /// 相对于文件夹根的目录部分
    #[serde(default)]
    pub relative_path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32: Option<u32>,
}

/// 一次目录遍历的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
    pub entries: Vec<RemoteEntry>,
}

/// 远端 API 客户端：为文件解析下载链接
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// 链接可能过期，收到 401/403 时会再次调用
    async fn resolve_download_link(&self, item: &Item) -> Result<DownloadLink>;
}

/// 目录树遍历器
#[async_trait]
pub trait TreeWalker: Send + Sync {
    async fn walk(&self, folder_id: &str) -> Result<RemoteFolder>;
}
