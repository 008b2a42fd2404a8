use super::status::DownloadStatus;
use crate::error::{DownloadError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// 已解析的下载链接
///
/// 链接可能过期，不做持久化；401/403 时重新解析
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub url: String,
    /// 可选的 Bearer token
    pub bearer_token: Option<String>,
}

impl DownloadLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// 组内的一个远端文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// 远端文件ID
    pub id: String,
    pub group_id: String,
    pub name: String,
    /// 文件大小（字节），创建后不可变
    pub size: u64,
    /// 校验完成后写入的 CRC32
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32: Option<u32>,
    /// 目录遍历时给出的期望 CRC32
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_crc32: Option<u32>,
    /// 相对于组保存目录的目录部分，如 "科幻片/2014"
    pub relative_path: String,
    #[serde(skip)]
    pub download_link: Option<DownloadLink>,
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 已下载字节数
    #[serde(default)]
    pub downloaded_bytes: u64,
    pub added_at: DateTime<Utc>,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        group_id: impl Into<String>,
        name: impl Into<String>,
        relative_path: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            group_id: group_id.into(),
            name: name.into(),
            size,
            crc32: None,
            remote_crc32: None,
            relative_path: relative_path.into(),
            download_link: None,
            status: DownloadStatus::Pending,
            error: None,
            downloaded_bytes: 0,
            added_at: Utc::now(),
        }
    }

    /// 按状态机迁移状态
    pub fn transition(&mut self, next: DownloadStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DownloadError::InvalidTransition(format!(
                "文件 {} 状态不能从 {:?} 变为 {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next == DownloadStatus::Downloading {
            self.error = None;
        }
        Ok(())
    }

    /// 组内唯一键：relative_path + name
    pub fn path_key(&self) -> String {
        let dir = self.relative_path.trim_matches('/');
        if dir.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", dir, self.name)
        }
    }

    /// 本地文件路径 `{save_at}/{relative_path}/{name}`
    ///
    /// 拒绝包含 `..`、根目录或盘符前缀的路径，保证文件落在 save_at 之下
    pub fn destination(&self, save_at: &Path) -> Result<PathBuf> {
        if self.name.is_empty() || self.name.contains('/') || self.name.contains('\\') {
            return Err(DownloadError::InvalidPath(self.name.clone()));
        }
        let mut path = save_at.to_path_buf();
        for component in Path::new(&self.relative_path).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::RootDir if self.relative_path.starts_with('/') => {}
                _ => return Err(DownloadError::InvalidPath(self.relative_path.clone())),
            }
        }
        if self.name == ".." || self.name == "." {
            return Err(DownloadError::InvalidPath(self.name.clone()));
        }
        path.push(&self.name);
        Ok(path)
    }

    /// 进度百分比
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            return if self.status == DownloadStatus::Completed { 100.0 } else { 0.0 };
        }
        (self.downloaded_bytes as f64 / self.size as f64) * 100.0
    }

    /// 估算剩余时间 (秒)
    pub fn eta(&self, speed: u64) -> Option<u64> {
        if speed == 0 || self.downloaded_bytes >= self.size {
            return None;
        }
        Some((self.size - self.downloaded_bytes) / speed)
    }
}
