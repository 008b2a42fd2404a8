//! 下载事件与事件出口
//!
//! 核心只依赖 [`EventSink`] trait，由外部在构造调度器时注入，
//! 不存在任何全局发布订阅单例。

use crate::common::Histogram;
use crate::downloader::{DownloadStatus, FragmentSnapshot, GroupState, WorkerInfo};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// 单个文件的实时统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStats {
    pub item_id: String,
    pub group_id: String,
    pub downloaded_bytes: u64,
    /// 距上一次统计事件新增的字节数
    pub bytes_since_last_event: u64,
    /// 当前速度（字节/秒）
    pub speed: f64,
    pub fragments: Vec<FragmentSnapshot>,
    /// 各 Worker 当前状态
    pub workers: Vec<WorkerInfo>,
    pub histogram: Histogram,
}

/// 全局统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadManagerStats {
    /// 进程启动以来下载的总字节数
    pub lifetime_bytes: u64,
    pub speed: f64,
    pub histogram: Histogram,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// 组下载状态变更
    GroupStatusChanged {
        group_id: String,
        old_status: DownloadStatus,
        new_status: DownloadStatus,
    },
    /// 组初始化状态变更
    GroupStateChanged {
        group_id: String,
        state: GroupState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// 文件状态变更
    ItemStatusChanged {
        item_id: String,
        group_id: String,
        old_status: DownloadStatus,
        new_status: DownloadStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// 文件进度
    ItemProgress(ItemStats),
    /// 全局统计
    ManagerStats(DownloadManagerStats),
}

impl DownloadEvent {
    pub fn group_id(&self) -> Option<&str> {
        match self {
            DownloadEvent::GroupStatusChanged { group_id, .. }
            | DownloadEvent::GroupStateChanged { group_id, .. }
            | DownloadEvent::ItemStatusChanged { group_id, .. } => Some(group_id),
            DownloadEvent::ItemProgress(stats) => Some(&stats.group_id),
            DownloadEvent::ManagerStats(_) => None,
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            DownloadEvent::ItemStatusChanged { item_id, .. } => Some(item_id),
            DownloadEvent::ItemProgress(stats) => Some(&stats.item_id),
            DownloadEvent::GroupStatusChanged { .. }
            | DownloadEvent::GroupStateChanged { .. }
            | DownloadEvent::ManagerStats(_) => None,
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            DownloadEvent::GroupStatusChanged { .. } => "group_status_changed",
            DownloadEvent::GroupStateChanged { .. } => "group_state_changed",
            DownloadEvent::ItemStatusChanged { .. } => "item_status_changed",
            DownloadEvent::ItemProgress(_) => "item_progress",
            DownloadEvent::ManagerStats(_) => "manager_stats",
        }
    }
}

/// 事件出口
pub trait EventSink: Send + Sync {
    fn publish(&self, event: DownloadEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: DownloadEvent) {}
}

/// 基于 broadcast 的扇出出口
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<DownloadEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: DownloadEvent) {
        // 没有订阅者时发送失败，直接忽略
        let name = event.event_type_name();
        if self.sender.send(event).is_err() {
            trace!("事件无订阅者，已丢弃: {}", name);
        }
    }
}
