//! 下载调度器
//!
//! 三个独立的准入信号量：
//! - 同时下载的组数
//! - 同时下载的小文件数
//! - 同时下载的大文件数（按大小阈值划分）
//!
//! 调度循环按 FIFO 取出就绪的组，拿到组许可后为该组启动大、小两条通道。
//! 每条通道一次只排队等待一个对应档位的许可，拿到后才启动下一个文件，
//! 信号量本身是公平的，因此多个组会交替获得许可。

use super::chunked::{ChunkedDownloader, DownloaderConfig, DownloaderContext};
use super::group::{Group, GroupProgress};
use super::http::create_download_client;
use super::item::Item;
use super::status::{DownloadStatus, GroupState};
use super::telemetry::{now_ms, AggregateStats};
use crate::error::{DownloadError, Result};
use crate::events::{DownloadEvent, DownloadManagerStats, EventSink};
use crate::remote::{RemoteClient, TreeWalker};
use crate::store::DownloadStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 调度器参数
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_groups: usize,
    pub max_concurrent_small: usize,
    pub max_concurrent_large: usize,
    /// 大于等于该值的文件走大文件通道
    pub large_file_threshold: u64,
    /// 全局统计事件间隔
    pub stats_interval: Duration,
    pub downloader: DownloaderConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_groups: 2,
            max_concurrent_small: 4,
            max_concurrent_large: 2,
            large_file_threshold: 64 * 1024 * 1024,
            stats_interval: Duration::from_secs(1),
            downloader: DownloaderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Small,
    Large,
}

/// 排队与运行状态，统一由一把锁保护
#[derive(Debug, Default)]
struct QueueState {
    /// 等待组许可的组
    queued: VecDeque<String>,
    /// 已获得组许可的组 -> 取消令牌
    active: Vec<(String, CancellationToken)>,
    paused_groups: HashSet<String>,
    /// 单独暂停的文件
    paused_items: HashSet<String>,
    /// 失败且尚未手动重试的文件
    failed_items: HashSet<String>,
    /// 已被通道领取、正在运行的文件
    running_items: HashSet<String>,
}

impl QueueState {
    fn is_active(&self, group_id: &str) -> bool {
        self.active.iter().any(|(id, _)| id == group_id)
    }

    fn is_held(&self, item_id: &str) -> bool {
        self.paused_items.contains(item_id)
            || self.failed_items.contains(item_id)
            || self.running_items.contains(item_id)
    }
}

#[derive(Clone)]
pub struct DownloadScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    store: Arc<DownloadStore>,
    walker: Arc<dyn TreeWalker>,
    ctx: DownloaderContext,
    group_permits: Arc<Semaphore>,
    small_permits: Arc<Semaphore>,
    large_permits: Arc<Semaphore>,
    queue: Mutex<QueueState>,
    downloaders: DashMap<String, ChunkedDownloader>,
    /// 串行化组状态的重新计算
    status_lock: Mutex<()>,
    notify: Notify,
    shutdown: CancellationToken,
}

impl DownloadScheduler {
    /// 创建调度器并启动调度循环与统计循环
    pub fn new(
        config: SchedulerConfig,
        store: Arc<DownloadStore>,
        walker: Arc<dyn TreeWalker>,
        remote: Arc<dyn RemoteClient>,
        events: Arc<dyn EventSink>,
    ) -> anyhow::Result<Self> {
        let client = create_download_client()?;
        Ok(Self::with_client(config, client, store, walker, remote, events))
    }

    /// 使用指定的 HTTP 客户端创建调度器
    pub fn with_client(
        config: SchedulerConfig,
        client: reqwest::Client,
        store: Arc<DownloadStore>,
        walker: Arc<dyn TreeWalker>,
        remote: Arc<dyn RemoteClient>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let ctx = DownloaderContext {
            client,
            store: store.clone(),
            remote,
            events,
            aggregate: Arc::new(AggregateStats::new()),
        };

        let inner = Arc::new(SchedulerInner {
            group_permits: Arc::new(Semaphore::new(config.max_concurrent_groups.max(1))),
            small_permits: Arc::new(Semaphore::new(config.max_concurrent_small.max(1))),
            large_permits: Arc::new(Semaphore::new(config.max_concurrent_large.max(1))),
            config,
            store,
            walker,
            ctx,
            queue: Mutex::new(QueueState::default()),
            downloaders: DashMap::new(),
            status_lock: Mutex::new(()),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        info!(
            "下载调度器启动: 组并发={}, 小文件并发={}, 大文件并发={}, 大文件阈值={:.1}MB",
            inner.config.max_concurrent_groups,
            inner.config.max_concurrent_small,
            inner.config.max_concurrent_large,
            inner.config.large_file_threshold as f64 / 1024.0 / 1024.0
        );

        tokio::spawn(inner.clone().dispatch_loop());
        tokio::spawn(inner.clone().stats_loop());

        Self { inner }
    }

    /// 添加一个组及其文件
    ///
    /// 组处于 Ready 状态时立即进入调度队列
    pub fn add_group(&self, group: Group, items: Vec<Item>) -> Result<()> {
        let items = validate_items(&group, items)?;

        let group_id = group.id.clone();
        let ready = group.is_ready();
        if !self.inner.store.groups.insert_if_absent(group_id.clone(), group) {
            return Err(DownloadError::DuplicateItem(format!("组 {} 已存在", group_id)));
        }
        if let Err(e) = self.inner.insert_items(items) {
            self.inner.store.groups.remove(&group_id);
            return Err(e);
        }

        info!("添加下载组: {}", group_id);
        if ready {
            self.inner.refresh_group_status(&group_id);
            self.inner.enqueue(&group_id);
        }
        Ok(())
    }

    /// 请求下载一个远端文件夹
    ///
    /// 组先以 Initializing 状态登记，目录遍历完成后写入文件列表并切换为 Ready。
    /// 遍历失败时组标记为 Error。
    pub async fn request_folder(&self, folder_id: &str, save_at: impl Into<PathBuf>) -> Result<Group> {
        let group = Group::new(folder_id, folder_id, save_at);
        if !self.inner.store.groups.insert_if_absent(group.id.clone(), group.clone()) {
            return Err(DownloadError::DuplicateItem(format!("组 {} 已存在", folder_id)));
        }
        self.inner.ctx.events.publish(DownloadEvent::GroupStateChanged {
            group_id: group.id.clone(),
            state: GroupState::Initializing,
            error: None,
        });

        let folder = match self.inner.walker.walk(folder_id).await {
            Ok(folder) => folder,
            Err(e) => {
                let message = format!("{:#}", e);
                error!("遍历远端文件夹失败: {}, 错误: {}", folder_id, message);
                self.inner.fail_group(folder_id, &message);
                return Err(DownloadError::Remote(message));
            }
        };

        let items: Vec<Item> = folder
            .entries
            .iter()
            .map(|entry| {
                let mut item = Item::new(
                    entry.file_id.clone(),
                    folder_id,
                    entry.name.clone(),
                    entry.relative_path.clone(),
                    entry.size,
                );
                item.remote_crc32 = entry.crc32;
                item
            })
            .collect();

        let items = match validate_items(&group, items) {
            Ok(items) => items,
            Err(e) => {
                self.inner.fail_group(folder_id, &e.to_string());
                return Err(e);
            }
        };

        info!(
            "远端文件夹遍历完成: {} ({}), {} 个文件",
            folder.name,
            folder_id,
            items.len()
        );
        self.inner.store.groups.update(&folder_id.to_string(), |g| {
            g.name = folder.name.clone();
        });
        if let Err(e) = self.inner.insert_items(items) {
            self.inner.fail_group(folder_id, &e.to_string());
            return Err(e);
        }

        self.mark_group_ready(folder_id)?;
        self.group(folder_id)
            .ok_or_else(|| DownloadError::NotFound(folder_id.to_string()))
    }

    /// Initializing -> Ready，并进入调度队列
    pub fn mark_group_ready(&self, group_id: &str) -> Result<()> {
        let (_, result) = self
            .inner
            .store
            .groups
            .update(&group_id.to_string(), |g| g.advance_state(GroupState::Ready))
            .ok_or_else(|| DownloadError::NotFound(group_id.to_string()))?;
        result?;

        self.inner.ctx.events.publish(DownloadEvent::GroupStateChanged {
            group_id: group_id.to_string(),
            state: GroupState::Ready,
            error: None,
        });
        self.inner.refresh_group_status(group_id);
        self.inner.enqueue(group_id);
        Ok(())
    }

    /// 暂停整个组：正在下载的文件暂停，排队的文件不再启动
    pub async fn pause_group(&self, group_id: &str) -> Result<()> {
        self.inner.require_group(group_id)?;
        {
            let mut queue = self.inner.queue.lock();
            queue.paused_groups.insert(group_id.to_string());
            queue.queued.retain(|id| id != group_id);
            if let Some((_, token)) = queue.active.iter().find(|(id, _)| id == group_id) {
                token.cancel();
            }
        }

        for item in self.inner.store.items_of_group(group_id) {
            if let Some(downloader) = self.inner.downloader(&item.id) {
                downloader.pause().await;
            }
        }
        self.inner.refresh_group_status(group_id);
        info!("⏸ 组已暂停: {}", group_id);
        Ok(())
    }

    /// 恢复组内所有暂停的文件
    pub fn resume_group(&self, group_id: &str) -> Result<()> {
        self.inner.require_group(group_id)?;
        let items = self.inner.store.items_of_group(group_id);
        {
            let mut queue = self.inner.queue.lock();
            queue.paused_groups.remove(group_id);
            for item in &items {
                queue.paused_items.remove(&item.id);
            }
        }
        self.inner.refresh_group_status(group_id);
        self.inner.enqueue(group_id);
        info!("▶ 组已恢复: {}", group_id);
        Ok(())
    }

    /// 暂停单个文件
    pub async fn pause_item(&self, item_id: &str) -> Result<()> {
        let item = self.inner.require_item(item_id)?;
        self.inner.queue.lock().paused_items.insert(item_id.to_string());

        match self.inner.downloader(item_id) {
            Some(downloader) => downloader.pause().await,
            None if item.status == DownloadStatus::Pending => {
                self.inner.transition_item(item_id, DownloadStatus::Paused)?;
            }
            None => {}
        }
        self.inner.refresh_group_status(&item.group_id);
        Ok(())
    }

    /// 恢复单个暂停的文件
    pub fn resume_item(&self, item_id: &str) -> Result<()> {
        let item = self.inner.require_item(item_id)?;
        self.inner.queue.lock().paused_items.remove(item_id);
        self.inner.enqueue(&item.group_id);
        Ok(())
    }

    /// 手动重试失败或暂停的文件，从已保存的分片进度继续
    pub fn retry_item(&self, item_id: &str) -> Result<()> {
        let item = self.inner.require_item(item_id)?;
        if !matches!(item.status, DownloadStatus::Error | DownloadStatus::Paused) {
            return Err(DownloadError::InvalidTransition(format!(
                "文件 {} 当前状态 {:?} 不能重试",
                item_id, item.status
            )));
        }
        {
            let mut queue = self.inner.queue.lock();
            queue.failed_items.remove(item_id);
            queue.paused_items.remove(item_id);
            queue.paused_groups.remove(&item.group_id);
        }
        info!("🔁 重试文件: {}", item_id);
        self.inner.enqueue(&item.group_id);
        Ok(())
    }

    /// 删除组及其文件记录（已下载的本地文件保留）
    pub async fn remove_group(&self, group_id: &str) -> Result<()> {
        self.pause_group(group_id).await?;

        let removed = self.inner.store.items.remove_where(|item| item.group_id == group_id);
        {
            let mut queue = self.inner.queue.lock();
            queue.paused_groups.remove(group_id);
            for item in &removed {
                queue.paused_items.remove(&item.id);
                queue.failed_items.remove(&item.id);
            }
        }
        for item in &removed {
            self.inner.downloaders.remove(&item.id);
        }
        self.inner.store.groups.remove(&group_id.to_string());
        info!("🗑 已删除组: {} ({} 个文件)", group_id, removed.len());
        Ok(())
    }

    pub fn group(&self, group_id: &str) -> Option<Group> {
        self.inner.store.groups.get(&group_id.to_string())
    }

    pub fn groups(&self) -> Vec<Group> {
        let mut groups = self.inner.store.groups.list();
        groups.sort_by(|a, b| a.added_at.cmp(&b.added_at));
        groups
    }

    pub fn item(&self, item_id: &str) -> Option<Item> {
        self.inner.store.items.get(&item_id.to_string())
    }

    pub fn items_of_group(&self, group_id: &str) -> Vec<Item> {
        self.inner.store.items_of_group(group_id)
    }

    pub fn group_progress(&self, group_id: &str) -> Option<GroupProgress> {
        self.group(group_id)?;
        Some(GroupProgress::from_items(&self.inner.store.items_of_group(group_id)))
    }

    pub fn stats(&self) -> DownloadManagerStats {
        self.inner.ctx.aggregate.snapshot(now_ms())
    }

    /// 停止调度并暂停所有正在下载的文件
    pub async fn shutdown(&self) {
        info!("下载调度器关闭中...");
        self.inner.shutdown.cancel();
        let downloaders: Vec<ChunkedDownloader> = self
            .inner
            .downloaders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for downloader in downloaders {
            if downloader.is_running() {
                downloader.pause().await;
            }
        }
        info!("下载调度器已关闭");
    }
}

/// 补齐 group_id，检查组内路径唯一且合法
fn validate_items(group: &Group, items: Vec<Item>) -> Result<Vec<Item>> {
    let mut seen = HashSet::new();
    let mut validated = Vec::with_capacity(items.len());
    for mut item in items {
        item.group_id = group.id.clone();
        item.destination(&group.save_at)?;
        if !seen.insert(item.path_key()) {
            return Err(DownloadError::DuplicateItem(item.path_key()));
        }
        validated.push(item);
    }
    Ok(validated)
}

impl SchedulerInner {
    fn require_group(&self, group_id: &str) -> Result<Group> {
        self.store
            .groups
            .get(&group_id.to_string())
            .ok_or_else(|| DownloadError::NotFound(group_id.to_string()))
    }

    fn require_item(&self, item_id: &str) -> Result<Item> {
        self.store
            .items
            .get(&item_id.to_string())
            .ok_or_else(|| DownloadError::NotFound(item_id.to_string()))
    }

    fn downloader(&self, item_id: &str) -> Option<ChunkedDownloader> {
        self.downloaders.get(item_id).map(|entry| entry.value().clone())
    }

    fn downloader_for(&self, item: &Item, save_at: &Path) -> ChunkedDownloader {
        self.downloaders
            .entry(item.id.clone())
            .or_insert_with(|| {
                ChunkedDownloader::new(
                    item,
                    save_at,
                    self.config.downloader.clone(),
                    self.ctx.clone(),
                )
            })
            .clone()
    }

    fn transition_item(&self, item_id: &str, next: DownloadStatus) -> Result<()> {
        let (item, result) = self
            .store
            .items
            .update(&item_id.to_string(), |item| {
                let old = item.status;
                item.transition(next).map(|_| old)
            })
            .ok_or_else(|| DownloadError::NotFound(item_id.to_string()))?;
        let old = result?;
        self.ctx.events.publish(DownloadEvent::ItemStatusChanged {
            item_id: item.id,
            group_id: item.group_id,
            old_status: old,
            new_status: next,
            error: None,
        });
        Ok(())
    }

    /// 写入组内文件，文件ID已被其他组占用时整体回滚
    fn insert_items(&self, items: Vec<Item>) -> Result<()> {
        let mut inserted: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id.clone();
            let group_id = item.group_id.clone();
            if !self.store.items.insert_if_absent(id.clone(), item) {
                for id in &inserted {
                    self.store.items.remove(id);
                }
                let owner = self.store.items.get(&id).map(|i| i.group_id).unwrap_or_default();
                warn!("文件 {} 已属于组 {}，无法加入组 {}", id, owner, group_id);
                return Err(DownloadError::DuplicateItem(format!(
                    "文件 {} 已属于组 {}",
                    id, owner
                )));
            }
            inserted.push(id);
        }
        Ok(())
    }

    fn fail_group(&self, group_id: &str, message: &str) {
        let updated = self.store.groups.update(&group_id.to_string(), |g| {
            let old = g.status;
            g.status = DownloadStatus::Error;
            g.error = Some(message.to_string());
            old
        });
        if let Some((group, old)) = updated {
            self.ctx.events.publish(DownloadEvent::GroupStateChanged {
                group_id: group.id.clone(),
                state: group.state,
                error: Some(message.to_string()),
            });
            self.ctx.events.publish(DownloadEvent::GroupStatusChanged {
                group_id: group.id,
                old_status: old,
                new_status: DownloadStatus::Error,
            });
        }
    }

    /// 组状态由组内文件状态汇总得出
    fn refresh_group_status(&self, group_id: &str) {
        let _guard = self.status_lock.lock();
        let Some(group) = self.store.groups.get(&group_id.to_string()) else {
            return;
        };
        if group.state != GroupState::Ready {
            return;
        }

        let items = self.store.items_of_group(group_id);
        let mut status = if items.is_empty() {
            DownloadStatus::Completed
        } else {
            DownloadStatus::aggregate(items.iter().map(|item| item.status))
        };
        if status == DownloadStatus::Pending && self.queue.lock().paused_groups.contains(group_id) {
            status = DownloadStatus::Paused;
        }
        if status == group.status {
            return;
        }

        self.store.groups.update(&group_id.to_string(), |g| {
            g.status = status;
            if status != DownloadStatus::Error {
                g.error = None;
            }
        });
        debug!("组状态变更: {} {:?} -> {:?}", group_id, group.status, status);
        self.ctx.events.publish(DownloadEvent::GroupStatusChanged {
            group_id: group_id.to_string(),
            old_status: group.status,
            new_status: status,
        });
    }

    /// 组就绪、未暂停、未在运行也未排队时加入队列
    fn enqueue(&self, group_id: &str) {
        let ready = self
            .store
            .groups
            .get(&group_id.to_string())
            .map_or(false, |g| g.is_ready());
        if !ready {
            return;
        }

        let mut queue = self.queue.lock();
        if queue.paused_groups.contains(group_id)
            || queue.is_active(group_id)
            || queue.queued.iter().any(|id| id == group_id)
        {
            return;
        }
        queue.queued.push_back(group_id.to_string());
        drop(queue);

        debug!("组进入调度队列: {}", group_id);
        self.notify.notify_one();
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let group_id = loop {
                let next = self.queue.lock().queued.pop_front();
                if let Some(id) = next {
                    break id;
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = self.notify.notified() => {}
                }
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                permit = self.group_permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let token = {
                let mut queue = self.queue.lock();
                let removed = self.store.groups.get(&group_id).is_none();
                if removed || queue.paused_groups.contains(&group_id) || queue.is_active(&group_id) {
                    continue;
                }
                let token = self.shutdown.child_token();
                queue.active.push((group_id.clone(), token.clone()));
                token
            };

            info!("📥 组开始下载: {}", group_id);
            tokio::spawn(self.clone().run_group(group_id, permit, token));
        }
    }

    async fn run_group(self: Arc<Self>, group_id: String, permit: OwnedSemaphorePermit, token: CancellationToken) {
        let Some(group) = self.store.groups.get(&group_id) else {
            self.queue.lock().active.retain(|(id, _)| id != &group_id);
            return;
        };

        tokio::join!(
            self.clone().run_lane(&group, Tier::Small, &token),
            self.clone().run_lane(&group, Tier::Large, &token),
        );

        let requeue = {
            let mut queue = self.queue.lock();
            queue.active.retain(|(id, _)| id != &group_id);
            // 暂停期间到达的恢复请求在这里补上
            !self.shutdown.is_cancelled()
                && !queue.paused_groups.contains(&group_id)
                && self.has_runnable_items(&group_id, &queue)
        };
        self.refresh_group_status(&group_id);
        drop(permit);

        if requeue {
            self.enqueue(&group_id);
        } else {
            debug!("组调度结束: {}", group_id);
        }
    }

    fn has_runnable_items(&self, group_id: &str, queue: &QueueState) -> bool {
        self.store
            .items_of_group(group_id)
            .iter()
            .any(|item| is_runnable(item) && !queue.is_held(&item.id))
    }

    /// 领取组内下一个可运行的文件
    fn claim_next(&self, group_id: &str, tier: Tier) -> Option<Item> {
        let items = self.store.items_of_group(group_id);
        let mut queue = self.queue.lock();
        let item = items.into_iter().find(|item| {
            self.tier_of(item) == tier && is_runnable(item) && !queue.is_held(&item.id)
        })?;
        queue.running_items.insert(item.id.clone());
        Some(item)
    }

    fn tier_of(&self, item: &Item) -> Tier {
        if item.size >= self.config.large_file_threshold {
            Tier::Large
        } else {
            Tier::Small
        }
    }

    async fn run_lane(self: Arc<Self>, group: &Group, tier: Tier, token: &CancellationToken) {
        let semaphore = match tier {
            Tier::Small => self.small_permits.clone(),
            Tier::Large => self.large_permits.clone(),
        };
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let Some(item) = self.claim_next(&group.id, tier) else {
                break;
            };
            tasks.spawn(self.clone().run_item(item, group.save_at.clone(), permit, token.clone()));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("文件下载任务异常退出: {}", e);
            }
        }
    }

    async fn run_item(
        self: Arc<Self>,
        item: Item,
        save_at: PathBuf,
        _permit: OwnedSemaphorePermit,
        token: CancellationToken,
    ) {
        let downloader = self.downloader_for(&item, &save_at);

        match downloader.start() {
            Ok(()) => {
                self.refresh_group_status(&item.group_id);
                let status = tokio::select! {
                    status = downloader.wait() => status,
                    _ = token.cancelled() => {
                        downloader.pause().await;
                        DownloadStatus::Paused
                    }
                };
                if status == DownloadStatus::Error {
                    self.queue.lock().failed_items.insert(item.id.clone());
                }
            }
            Err(DownloadError::AlreadyCompleted) => {
                debug!("文件已完成，跳过: {}", item.id);
            }
            Err(e) => {
                warn!("启动文件下载失败: {}, 错误: {}", item.id, e);
                self.queue.lock().failed_items.insert(item.id.clone());
            }
        }

        self.queue.lock().running_items.remove(&item.id);
        self.refresh_group_status(&item.group_id);
    }

    async fn stats_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.stats_interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let stats = self.ctx.aggregate.snapshot(now_ms());
                    self.ctx.events.publish(DownloadEvent::ManagerStats(stats));
                }
            }
        }
    }
}

fn is_runnable(item: &Item) -> bool {
    match item.status {
        DownloadStatus::Pending | DownloadStatus::Paused | DownloadStatus::Error => true,
        DownloadStatus::Downloading | DownloadStatus::Completed => false,
    }
}
