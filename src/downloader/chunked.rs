//! 单文件分片下载器
//!
//! 每个 Item 对应一个 `ChunkedDownloader`，它持有分片分配器、吞吐量统计和一组 Worker：
//!
//! 1. 解析下载链接并探测远端大小与 Range 支持
//! 2. 从续传记录恢复已完成分片（不支持 Range 时回退为单流下载）
//! 3. 启动最多 `workers` 个 Worker，聚合它们的进度事件
//! 4. 瞬时错误由新的 Worker 重试，超过次数后文件失败
//! 5. 开启性能监控时，持续低速先自动重启一次，再次发生则判定失败
//! 6. 所有分片完成后校验并标记 Completed

use super::checksum::crc32_file_async;
use super::fragment::{FragmentAllocator, WorkerId};
use super::http::{self, calculate_timeout_secs, ProbeResult};
use super::item::{DownloadLink, Item};
use super::resume::{self, ResumeState};
use super::status::DownloadStatus;
use super::telemetry::{now_ms, AggregateStats, HISTOGRAM_WINDOW_SECS, RETENTION_SECS, SPEED_WINDOW_SECS};
use super::worker::{ExitReason, Worker, WorkerContext, WorkerEvent, WorkerExit, WorkerState};
use crate::common::{SpeedTracker, StallConfig, StallMonitor, UpdateMode};
use crate::error::{DownloadError, Result};
use crate::events::{DownloadEvent, EventSink, ItemStats};
use crate::remote::RemoteClient;
use crate::store::DownloadStore;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 下载器参数
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 每个文件的 Worker 数
    pub workers: usize,
    /// 单个分片的最大重试次数
    pub max_retries: u32,
    /// 首次重试的等待时间，之后指数增长
    pub retry_backoff: Duration,
    /// 进度事件间隔
    pub progress_interval: Duration,
    /// 读超时：等待响应头或下一个数据块的最长时间
    pub read_timeout: Duration,
    /// 完成后计算 CRC32
    pub verify_checksum: bool,
    /// 停滞检测，None 表示关闭
    pub stall: Option<StallConfig>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: super::fragment::DEFAULT_CHUNK_SIZE,
            workers: 4,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            progress_interval: Duration::from_secs(1),
            read_timeout: Duration::from_secs(60),
            verify_checksum: true,
            stall: None,
        }
    }
}

impl DownloaderConfig {
    /// 第 `retries` 次重试前的等待时间
    fn backoff(&self, retries: u32) -> Duration {
        let exp = retries.saturating_sub(1).min(5);
        self.retry_backoff * 2u32.pow(exp)
    }
}

/// 下载器依赖的共享组件
#[derive(Clone)]
pub struct DownloaderContext {
    pub client: Client,
    pub store: Arc<DownloadStore>,
    pub remote: Arc<dyn RemoteClient>,
    pub events: Arc<dyn EventSink>,
    pub aggregate: Arc<AggregateStats>,
}

/// Worker 运行状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub state: WorkerState,
    /// 当前分片
    pub fragment: Option<usize>,
    /// 当前分片已接收字节数
    pub bytes: u64,
}

#[derive(Clone)]
pub struct ChunkedDownloader {
    inner: Arc<Inner>,
}

struct Inner {
    item_id: String,
    group_id: String,
    save_at: PathBuf,
    config: DownloaderConfig,
    ctx: DownloaderContext,
    /// 当前运行的取消令牌
    control: Mutex<Option<CancellationToken>>,
    running: watch::Sender<bool>,
    workers: Mutex<BTreeMap<WorkerId, WorkerInfo>>,
}

/// 运行任务结束（包括异常退出）时复位运行标记
struct RunningGuard(Arc<Inner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.workers.lock().clear();
        self.0.running.send_replace(false);
    }
}

impl ChunkedDownloader {
    pub fn new(item: &Item, save_at: impl Into<PathBuf>, config: DownloaderConfig, ctx: DownloaderContext) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                item_id: item.id.clone(),
                group_id: item.group_id.clone(),
                save_at: save_at.into(),
                config,
                ctx,
                control: Mutex::new(None),
                running,
                workers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// 开始下载
    ///
    /// 下载在后台任务中进行，用 [`wait`](Self::wait) 等待结束
    pub fn start(&self) -> Result<()> {
        let mut control = self.inner.control.lock();
        if self.is_running() {
            return Err(DownloadError::AlreadyRunning);
        }

        let item = self.inner.item()?;
        match item.status {
            DownloadStatus::Completed => return Err(DownloadError::AlreadyCompleted),
            DownloadStatus::Downloading => {}
            DownloadStatus::Pending | DownloadStatus::Paused | DownloadStatus::Error => {
                self.inner.set_status(DownloadStatus::Downloading, None)?;
            }
        }

        let cancel = CancellationToken::new();
        *control = Some(cancel.clone());
        self.inner.running.send_replace(true);

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run(cancel).await });
        Ok(())
    }

    /// 暂停：取消所有在途请求并等待 Worker 退出，已完成的分片保留
    pub async fn pause(&self) {
        let token = self.inner.control.lock().take();
        if let Some(token) = token {
            token.cancel();
        }
        self.wait().await;

        if let Ok(item) = self.inner.item() {
            if matches!(item.status, DownloadStatus::Downloading | DownloadStatus::Pending) {
                if let Err(e) = self.inner.set_status(DownloadStatus::Paused, None) {
                    warn!("暂停文件 {} 失败: {}", self.inner.item_id, e);
                }
            }
        }
    }

    pub async fn stop(&self) {
        self.pause().await
    }

    /// 停止后重新开始，已完成分片从续传记录恢复
    pub async fn restart(&self) -> Result<()> {
        self.pause().await;
        self.start()
    }

    /// 等待后台任务结束，返回文件的最终状态
    pub async fn wait(&self) -> DownloadStatus {
        let mut rx = self.inner.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
        self.inner
            .item()
            .map(|item| item.status)
            .unwrap_or(DownloadStatus::Pending)
    }
}

impl Inner {
    fn item(&self) -> Result<Item> {
        self.ctx
            .store
            .items
            .get(&self.item_id)
            .ok_or_else(|| DownloadError::NotFound(self.item_id.clone()))
    }

    /// 按状态机迁移文件状态并发布事件
    fn set_status(&self, next: DownloadStatus, error: Option<String>) -> Result<()> {
        let (_, result) = self
            .ctx
            .store
            .items
            .update(&self.item_id, |item| {
                let old = item.status;
                item.transition(next).map(|_| {
                    item.error = error.clone();
                    old
                })
            })
            .ok_or_else(|| DownloadError::NotFound(self.item_id.clone()))?;
        let old = result?;

        self.ctx.events.publish(DownloadEvent::ItemStatusChanged {
            item_id: self.item_id.clone(),
            group_id: self.group_id.clone(),
            old_status: old,
            new_status: next,
            error,
        });
        Ok(())
    }

    fn track_worker(&self, id: WorkerId, state: WorkerState, fragment: Option<usize>, bytes: u64) {
        self.workers.lock().insert(
            id,
            WorkerInfo {
                id,
                state,
                fragment,
                bytes,
            },
        );
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let _guard = RunningGuard(self.clone());

        match self.download(&cancel).await {
            Ok(()) => {}
            Err(DownloadError::Cancelled) => {
                info!("⏸ 文件下载已暂停: {}", self.item_id);
            }
            Err(e) => {
                error!("❌ 文件下载失败: {}, 错误: {}", self.item_id, e);
                if let Err(err) = self.set_status(DownloadStatus::Error, Some(e.to_string())) {
                    warn!("标记文件 {} 失败状态出错: {}", self.item_id, err);
                }
            }
        }
    }

    async fn download(&self, cancel: &CancellationToken) -> Result<()> {
        let item = self.item()?;
        let destination = item.destination(&self.save_at)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if item.size == 0 {
            tokio::fs::File::create(&destination).await?;
            return self.complete(&item, &destination).await;
        }

        let mut link = self.link_for(&item, false, cancel).await?;
        let probe = self.probe(&item, &mut link, cancel).await?;

        let (allocator, resumed) = if probe.supports_range {
            let mut allocator = FragmentAllocator::new(item.size, self.config.chunk_size);
            let finished =
                resume::restore_finished(&destination, &item.id, item.size, self.config.chunk_size);
            let resumed = match finished {
                Some(finished) => {
                    allocator.seed_finished(&finished);
                    true
                }
                None => false,
            };
            (allocator, resumed)
        } else {
            if let Err(e) = resume::remove_resume_state(&destination) {
                warn!("删除续传记录失败: {:?}, 错误: {}", destination, e);
            }
            (FragmentAllocator::single_stream(item.size), false)
        };

        if !resumed {
            prepare_file(&destination, item.size).await?;
        }

        info!(
            "🚀 开始下载: {} ({} bytes, {} 个分片, 已完成 {}, 单流: {})",
            item.name,
            item.size,
            allocator.len(),
            allocator.finished_count(),
            allocator.is_full_stream()
        );

        self.drive(&item, allocator, link, &destination, cancel).await?;
        self.complete(&item, &destination).await
    }

    /// 获取下载链接，`refresh` 为 true 时强制重新解析
    async fn link_for(&self, item: &Item, refresh: bool, cancel: &CancellationToken) -> Result<DownloadLink> {
        if !refresh {
            if let Some(link) = self.item()?.download_link {
                return Ok(link);
            }
        }

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            resolved = self.ctx.remote.resolve_download_link(item) => resolved,
        };
        let link = resolved.map_err(|e| DownloadError::Remote(format!("{:#}", e)))?;

        self.ctx.store.items.update(&self.item_id, |item| {
            item.download_link = Some(link.clone());
        });
        debug!("已解析下载链接: {} -> {}", self.item_id, link.url);
        Ok(link)
    }

    async fn probe(&self, item: &Item, link: &mut DownloadLink, cancel: &CancellationToken) -> Result<ProbeResult> {
        let timeout = Duration::from_secs(calculate_timeout_secs(self.config.chunk_size));
        let mut attempts = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                result = http::probe(&self.ctx.client, link, item.size, timeout) => result,
            };

            match result {
                Ok(probe) => return Ok(probe),
                Err(e) if e.is_retryable() && attempts < self.config.max_retries => {
                    attempts += 1;
                    warn!("探测失败 (第 {} 次重试): {}, 错误: {}", attempts, item.id, e);
                    if matches!(e, DownloadError::LinkExpired { .. }) {
                        *link = self.link_for(item, true, cancel).await?;
                    } else {
                        sleep_or_cancel(self.config.backoff(attempts), cancel).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Worker 调度与进度聚合循环，所有分片完成时返回
    async fn drive(
        &self,
        item: &Item,
        allocator: FragmentAllocator,
        mut link: DownloadLink,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let full_stream = allocator.is_full_stream();
        let worker_limit = if full_stream { 1 } else { self.config.workers.max(1) };
        let read_timeout = self.config.read_timeout.max(Duration::from_millis(10));

        let mut finished_bytes = allocator.finished_bytes();
        let allocator = Arc::new(Mutex::new(allocator));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers: JoinSet<WorkerExit> = JoinSet::new();
        let mut generation = cancel.child_token();
        let mut in_flight: HashMap<WorkerId, u64> = HashMap::new();
        let mut next_worker_id: WorkerId = 0;
        let mut retry_at: Option<Instant> = None;
        let mut restarted = false;

        let mut tracker = SpeedTracker::new(finished_bytes, UpdateMode::Cumulative);
        let mut last_event_bytes = finished_bytes;

        let mut progress_tick = interval(self.config.progress_interval.max(Duration::from_millis(10)));
        progress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut monitor = self.config.stall.clone().map(StallMonitor::new);
        let check_interval = Duration::from_secs(
            monitor
                .as_ref()
                .map_or(3600, |m| m.config().check_interval_secs.max(1)),
        );
        let mut monitor_tick = interval_at(Instant::now() + check_interval, check_interval);

        self.ctx.store.items.update(&self.item_id, |item| {
            item.downloaded_bytes = finished_bytes;
        });

        loop {
            if retry_at.map_or(true, |at| Instant::now() >= at) {
                retry_at = None;
                while workers.len() < worker_limit {
                    let id = next_worker_id;
                    let Some(fragment) = allocator.lock().reserve_next(id) else {
                        break;
                    };
                    next_worker_id += 1;
                    self.track_worker(id, WorkerState::Running, Some(fragment.index), 0);

                    let ctx = WorkerContext {
                        allocator: allocator.clone(),
                        link: link.clone(),
                        destination: destination.to_path_buf(),
                        read_timeout,
                        cancel: generation.clone(),
                        events: tx.clone(),
                    };
                    workers.spawn(Worker::new(id, self.ctx.client.clone()).run(fragment, ctx));
                }
            }

            if workers.is_empty() && retry_at.is_none() {
                if allocator.lock().is_complete() {
                    break;
                }
                return Err(DownloadError::InvalidTransition(format!(
                    "文件 {} 没有在途 Worker 但仍有未完成分片",
                    self.item_id
                )));
            }

            let retry_sleep = async move {
                match retry_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.shutdown_workers(&mut workers, &generation, WorkerState::Stopped).await;
                    self.persist(&allocator, destination);
                    return Err(DownloadError::Cancelled);
                }
                Some(event) = rx.recv() => match event {
                    WorkerEvent::Progress { worker_id, index, timestamp_ms, bytes_so_far } => {
                        let prev = in_flight.insert(worker_id, bytes_so_far).unwrap_or(0);
                        self.ctx.aggregate.record(timestamp_ms, bytes_so_far.saturating_sub(prev));
                        tracker.update(timestamp_ms, finished_bytes + in_flight.values().sum::<u64>());
                        self.track_worker(worker_id, WorkerState::Running, Some(index), bytes_so_far);
                    }
                    WorkerEvent::Finished { worker_id, index, len } => {
                        in_flight.remove(&worker_id);
                        finished_bytes += len;
                        self.track_worker(worker_id, WorkerState::Running, None, 0);
                        self.persist(&allocator, destination);
                        debug!(
                            "分片 #{} 完成: {} (在途 {} 个)",
                            index,
                            self.item_id,
                            allocator.lock().reserved_count()
                        );
                    }
                },
                Some(joined) = workers.join_next() => {
                    let exit = match joined {
                        Ok(exit) => exit,
                        Err(e) => {
                            warn!("Worker 任务异常退出: {}", e);
                            retry_at = Some(Instant::now() + self.config.retry_backoff);
                            continue;
                        }
                    };
                    in_flight.remove(&exit.worker_id);
                    self.workers.lock().remove(&exit.worker_id);

                    if let ExitReason::Failed { index, error } = exit.reason {
                        let retries = allocator.lock().record_retry(index);
                        if !error.is_retryable() || retries > self.config.max_retries {
                            error!(
                                "分片 #{} 下载失败，放弃: {} (已重试 {} 次), 错误: {}",
                                index, self.item_id, retries.saturating_sub(1), error
                            );
                            self.shutdown_workers(&mut workers, &generation, WorkerState::Stopped).await;
                            self.persist(&allocator, destination);
                            return Err(error);
                        }

                        warn!("分片 #{} 下载失败 (第 {} 次重试): {}", index, retries, error);
                        if matches!(error, DownloadError::LinkExpired { .. }) {
                            match self.link_for(item, true, cancel).await {
                                Ok(refreshed) => link = refreshed,
                                Err(e) => {
                                    self.shutdown_workers(&mut workers, &generation, WorkerState::Stopped).await;
                                    self.persist(&allocator, destination);
                                    return Err(e);
                                }
                            }
                        }
                        retry_at = Some(Instant::now() + self.config.backoff(retries));
                    }
                }
                _ = progress_tick.tick() => {
                    let now = now_ms();
                    let total = finished_bytes + in_flight.values().sum::<u64>();
                    tracker.update(now, total);
                    tracker.forget_older_than((now / 1000).saturating_sub(RETENTION_SECS));
                    self.publish_stats(&allocator, &tracker, total, &mut last_event_bytes, now);
                }
                _ = monitor_tick.tick(), if monitor.is_some() => {
                    let now = now_ms();
                    let total = finished_bytes + in_flight.values().sum::<u64>();
                    tracker.update(now, total);
                    let window_ms = check_interval.as_millis() as u64;
                    let speed = tracker.query(Some(now.saturating_sub(window_ms)), Some(now));

                    let stalled = monitor.as_ref().map_or(false, |m| m.observe(speed));
                    if stalled {
                        if restarted {
                            self.shutdown_workers(&mut workers, &generation, WorkerState::Stopped).await;
                            self.persist(&allocator, destination);
                            return Err(DownloadError::Stalled(format!(
                                "重启后仍持续低速 ({:.2} KB/s)",
                                speed / 1024.0
                            )));
                        }

                        warn!("🔄 下载停滞，重启所有 Worker: {}", self.item_id);
                        restarted = true;
                        self.shutdown_workers(&mut workers, &generation, WorkerState::Restarting).await;
                        while rx.try_recv().is_ok() {}

                        let released = allocator.lock().reset_unfinished();
                        finished_bytes = allocator.lock().finished_bytes();
                        debug!("重启回收 {} 个分片预留", released);
                        in_flight.clear();
                        tracker.resume_at(finished_bytes);
                        last_event_bytes = finished_bytes;
                        if let Some(m) = monitor.as_mut() {
                            m.reset();
                        }
                        generation = cancel.child_token();
                        retry_at = None;
                    }
                }
                _ = retry_sleep => {}
            }
        }

        let now = now_ms();
        tracker.update(now, finished_bytes);
        self.publish_stats(&allocator, &tracker, finished_bytes, &mut last_event_bytes, now);
        Ok(())
    }

    /// 取消当前一代 Worker 并等待全部退出
    async fn shutdown_workers(
        &self,
        workers: &mut JoinSet<WorkerExit>,
        generation: &CancellationToken,
        state: WorkerState,
    ) {
        for info in self.workers.lock().values_mut() {
            info.state = state;
        }
        generation.cancel();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Worker 任务异常退出: {}", e);
            }
        }
        self.workers.lock().clear();
    }

    /// 写入续传记录，失败只记录日志
    fn persist(&self, allocator: &Mutex<FragmentAllocator>, destination: &Path) {
        let state = {
            let allocator = allocator.lock();
            if allocator.is_full_stream() {
                return;
            }
            ResumeState::from_allocator(&self.item_id, &allocator)
        };
        if let Err(e) = resume::save_resume_state(destination, &state) {
            warn!("保存续传记录失败: {:?}, 错误: {}", destination, e);
        }
    }

    fn publish_stats(
        &self,
        allocator: &Mutex<FragmentAllocator>,
        tracker: &SpeedTracker,
        total: u64,
        last_event_bytes: &mut u64,
        now: u64,
    ) {
        let speed = tracker.query(
            Some(now.saturating_sub((SPEED_WINDOW_SECS - 1) * 1000)),
            Some(now),
        );
        let histogram = tracker.histogram(
            Some(now.saturating_sub(HISTOGRAM_WINDOW_SECS * 1000)),
            Some(now),
            1,
        );
        let fragments = allocator.lock().snapshots();

        self.ctx.store.items.update(&self.item_id, |item| {
            item.downloaded_bytes = total;
        });

        self.ctx.events.publish(DownloadEvent::ItemProgress(ItemStats {
            item_id: self.item_id.clone(),
            group_id: self.group_id.clone(),
            downloaded_bytes: total,
            bytes_since_last_event: total.saturating_sub(*last_event_bytes),
            speed,
            fragments,
            workers: self.workers.lock().values().cloned().collect(),
            histogram,
        }));
        *last_event_bytes = total;
    }

    /// 全部分片完成后的处理：清理续传记录、校验、标记完成
    async fn complete(&self, item: &Item, destination: &Path) -> Result<()> {
        if let Err(e) = resume::remove_resume_state(destination) {
            warn!("删除续传记录失败: {:?}, 错误: {}", destination, e);
        }

        let crc32 = if self.config.verify_checksum {
            Some(crc32_file_async(destination.to_path_buf()).await?)
        } else {
            None
        };

        if let (Some(expected), Some(actual)) = (item.remote_crc32, crc32) {
            if expected != actual {
                return Err(DownloadError::ChecksumMismatch { expected, actual });
            }
        }

        let size = item.size;
        self.ctx.store.items.update(&self.item_id, |item| {
            item.downloaded_bytes = size;
            item.crc32 = crc32;
        });
        self.set_status(DownloadStatus::Completed, None)?;

        info!("✅ 文件下载完成: {} ({} bytes)", item.name, size);
        Ok(())
    }
}

/// 创建目标文件并预分配到完整大小
async fn prepare_file(path: &Path, size: u64) -> Result<()> {
    let file = tokio::fs::File::create(path).await?;
    file.set_len(size).await?;
    debug!("已预分配文件: {:?} ({} bytes)", path, size);
    Ok(())
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}
