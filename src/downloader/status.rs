use serde::{Deserialize, Serialize};

/// 下载状态（Group 与 Item 共用）
///
/// ```text
/// Pending -> Downloading -> Completed
///                |  ^   \-> Error
///                v  |          |
///              Paused <--------/ (手动重试 -> Downloading)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// 等待中
    Pending,
    /// 下载中
    Downloading,
    /// 已暂停
    Paused,
    /// 已完成
    Completed,
    /// 失败
    Error,
}

impl DownloadStatus {
    /// 状态机是否允许 `self -> next`
    pub fn can_transition_to(self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Paused)
                | (Downloading, Paused)
                | (Downloading, Completed)
                | (Downloading, Error)
                | (Paused, Downloading)
                | (Error, Downloading)
        )
    }

    /// 终态（失败状态在手动重试前也视为终态）
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Error)
    }

    /// 由组内所有文件的状态推导组状态
    ///
    /// - 有任一文件下载中 -> Downloading
    /// - 全部完成 -> Completed
    /// - 没有未结束的文件且存在失败 -> Error
    /// - 没有未结束的文件、存在暂停 -> Paused
    /// - 其余 -> Pending
    pub fn aggregate<I>(statuses: I) -> DownloadStatus
    where
        I: IntoIterator<Item = DownloadStatus>,
    {
        let mut total = 0usize;
        let mut completed = 0usize;
        let mut downloading = false;
        let mut pending = false;
        let mut paused = false;
        let mut error = false;

        for status in statuses {
            total += 1;
            match status {
                DownloadStatus::Pending => pending = true,
                DownloadStatus::Downloading => downloading = true,
                DownloadStatus::Paused => paused = true,
                DownloadStatus::Completed => completed += 1,
                DownloadStatus::Error => error = true,
            }
        }

        if downloading {
            DownloadStatus::Downloading
        } else if total > 0 && completed == total {
            DownloadStatus::Completed
        } else if pending {
            DownloadStatus::Pending
        } else if error {
            DownloadStatus::Error
        } else if paused {
            DownloadStatus::Paused
        } else {
            DownloadStatus::Pending
        }
    }
}

/// 组初始化状态，只能单向从 Initializing 前进到 Ready
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    /// 正在遍历远端目录
    Initializing,
    /// 文件列表已就绪，可以调度
    Ready,
}
