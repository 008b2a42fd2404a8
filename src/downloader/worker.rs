//! 分片下载 Worker
//!
//! 每个 Worker 是一个可独立取消的任务，循环执行"预留 -> 下载 -> 完成"，
//! 直到没有待下载分片。进度与分片完成通过 channel 推送给所属下载器的聚合循环。

use super::fragment::{Fragment, FragmentAllocator, WorkerId};
use super::http::authorize;
use super::item::DownloadLink;
use super::telemetry::now_ms;
use crate::error::{DownloadError, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
    Restarting,
}

/// Worker 推送给下载器的事件
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// 收到一个数据块
    Progress {
        worker_id: WorkerId,
        index: usize,
        timestamp_ms: u64,
        /// 当前分片已接收的字节数
        bytes_so_far: u64,
    },
    /// 分片已写入并标记完成
    Finished {
        worker_id: WorkerId,
        index: usize,
        len: u64,
    },
}

/// Worker 退出原因
#[derive(Debug)]
pub enum ExitReason {
    /// 没有可预留的分片
    Drained,
    Cancelled,
    /// 分片失败，已归还给分配器
    Failed { index: usize, error: DownloadError },
}

#[derive(Debug)]
pub struct WorkerExit {
    pub worker_id: WorkerId,
    pub reason: ExitReason,
}

/// Worker 运行所需的共享资源
#[derive(Clone)]
pub struct WorkerContext {
    pub allocator: Arc<Mutex<FragmentAllocator>>,
    pub link: DownloadLink,
    pub destination: PathBuf,
    /// 等待响应头或下一个数据块的最长时间，不限制整个响应体的传输时长
    pub read_timeout: Duration,
    pub cancel: CancellationToken,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

/// 分片租约
///
/// 未显式完成就被丢弃时（失败、取消、任务被中止）自动归还分片
struct FragmentLease {
    allocator: Arc<Mutex<FragmentAllocator>>,
    index: usize,
    worker_id: WorkerId,
    armed: bool,
}

impl FragmentLease {
    fn complete(mut self) -> Result<()> {
        self.armed = false;
        self.allocator.lock().complete(self.index, self.worker_id)
    }
}

impl Drop for FragmentLease {
    fn drop(&mut self) {
        if self.armed {
            // 重启时分片可能已被整体重置，归还失败可以忽略
            let _ = self.allocator.lock().release(self.index, self.worker_id);
        }
    }
}

fn read_timed_out(fragment: &Fragment, limit: Duration) -> DownloadError {
    DownloadError::Transient(format!(
        "分片 #{} 读取超时 ({}ms 内没有收到数据)",
        fragment.index,
        limit.as_millis()
    ))
}

pub struct Worker {
    id: WorkerId,
    client: Client,
    state: WorkerState,
}

impl Worker {
    pub fn new(id: WorkerId, client: Client) -> Self {
        Self {
            id,
            client,
            state: WorkerState::Idle,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// 从 `first` 开始循环下载，直到分片耗尽、被取消或失败
    pub async fn run(mut self, first: Fragment, ctx: WorkerContext) -> WorkerExit {
        self.state = WorkerState::Running;
        let mut next = Some(first);

        let reason = loop {
            let Some(fragment) = next.take() else {
                break ExitReason::Drained;
            };
            let lease = FragmentLease {
                allocator: ctx.allocator.clone(),
                index: fragment.index,
                worker_id: self.id,
                armed: true,
            };

            match self.download_fragment(&fragment, &ctx).await {
                Ok(()) => {
                    if let Err(e) = lease.complete() {
                        break ExitReason::Failed {
                            index: fragment.index,
                            error: e,
                        };
                    }
                    let _ = ctx.events.send(WorkerEvent::Finished {
                        worker_id: self.id,
                        index: fragment.index,
                        len: fragment.len(),
                    });
                }
                Err(DownloadError::Cancelled) => break ExitReason::Cancelled,
                Err(error) => {
                    drop(lease);
                    break ExitReason::Failed {
                        index: fragment.index,
                        error,
                    };
                }
            }

            if ctx.cancel.is_cancelled() {
                break ExitReason::Cancelled;
            }
            next = ctx.allocator.lock().reserve_next(self.id);
        };

        self.state = WorkerState::Stopped;
        debug!("Worker #{} 退出: {:?}", self.id, reason);
        WorkerExit {
            worker_id: self.id,
            reason,
        }
    }

    /// 下载单个分片到目标文件的对应偏移
    ///
    /// 单流模式下不带 Range 头，整个响应体写入偏移 0
    async fn download_fragment(&self, fragment: &Fragment, ctx: &WorkerContext) -> Result<()> {
        let full_stream = ctx.allocator.lock().is_full_stream();
        let file_size = ctx.allocator.lock().file_size();
        let covers_whole_file = fragment.start == 0 && fragment.end == file_size;

        let mut request = authorize(self.client.get(&ctx.link.url), &ctx.link);
        if !full_stream {
            request = request.header(RANGE, fragment.range_header());
        }

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = timeout(ctx.read_timeout, request.send()) => response
                .map_err(|_| read_timed_out(fragment, ctx.read_timeout))?
                .map_err(DownloadError::from_reqwest)?,
        };

        let status = response.status();
        match status {
            StatusCode::PARTIAL_CONTENT if !full_stream => {}
            StatusCode::OK if full_stream || covers_whole_file => {}
            StatusCode::OK => {
                return Err(DownloadError::ProtocolMismatch(format!(
                    "分片 #{} 的 Range 请求返回了 200",
                    fragment.index
                )));
            }
            other if other.is_success() => {
                return Err(DownloadError::ProtocolMismatch(format!(
                    "分片 #{} 返回了意外的状态码 {}",
                    fragment.index, other
                )));
            }
            other => return Err(DownloadError::from_status(other)),
        }

        let mut file = File::options().write(true).open(&ctx.destination).await?;
        file.seek(SeekFrom::Start(fragment.start)).await?;

        let expected = fragment.len();
        let mut received = 0u64;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    file.flush().await?;
                    return Err(DownloadError::Cancelled);
                }
                chunk = timeout(ctx.read_timeout, stream.next()) => {
                    chunk.map_err(|_| read_timed_out(fragment, ctx.read_timeout))?
                }
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(DownloadError::from_reqwest)?;

            if received + chunk.len() as u64 > expected {
                return Err(DownloadError::ProtocolMismatch(format!(
                    "分片 #{} 响应体超出预期长度 {}",
                    fragment.index, expected
                )));
            }
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            let _ = ctx.events.send(WorkerEvent::Progress {
                worker_id: self.id,
                index: fragment.index,
                timestamp_ms: now_ms(),
                bytes_so_far: received,
            });
        }

        file.flush().await?;

        if received < expected {
            warn!(
                "分片 #{} 响应体不完整: {}/{} bytes",
                fragment.index, received, expected
            );
            return Err(DownloadError::Transient(format!(
                "分片 #{} 响应体不完整: {}/{} bytes",
                fragment.index, received, expected
            )));
        }

        // 落盘后才能被续传记录标记为完成
        file.sync_data().await?;

        debug!(
            "Worker #{} 完成分片 #{} ({} bytes)",
            self.id, fragment.index, received
        );
        Ok(())
    }
}
