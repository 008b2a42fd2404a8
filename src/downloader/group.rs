use super::item::Item;
use super::status::{DownloadStatus, GroupState};
use crate::error::{DownloadError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 一个远端文件夹的下载单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// 远端文件夹ID
    pub id: String,
    pub name: String,
    pub added_at: DateTime<Utc>,
    /// 本地保存根目录
    pub save_at: PathBuf,
    pub status: DownloadStatus,
    pub state: GroupState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>, save_at: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            added_at: Utc::now(),
            save_at: save_at.into(),
            status: DownloadStatus::Pending,
            state: GroupState::Initializing,
            error: None,
        }
    }

    /// 推进初始化状态，不允许回退
    pub fn advance_state(&mut self, next: GroupState) -> Result<()> {
        if next < self.state {
            return Err(DownloadError::InvalidTransition(format!(
                "组 {} 状态不能从 {:?} 回退到 {:?}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state == GroupState::Ready
    }
}

/// 组内文件的汇总进度
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProgress {
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
}

impl GroupProgress {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
        items.into_iter().fold(Self::default(), |mut acc, item| {
            acc.total_items += 1;
            acc.total_bytes += item.size;
            acc.downloaded_bytes += item.downloaded_bytes.min(item.size);
            match item.status {
                DownloadStatus::Completed => acc.completed_items += 1,
                DownloadStatus::Error => acc.failed_items += 1,
                _ => {}
            }
            acc
        })
    }

    /// 进度百分比（0-100），空组视为已完成
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}
