//! 分片分配器
//!
//! 将 `[0, file_size)` 按固定大小切分为分片，并维护每个分片的生命周期：
//! pending -> reserved -> finished。同一时刻一个分片最多被一个 Worker 持有。

use crate::error::{DownloadError, Result};
use bit_set::BitSet;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// 默认分片大小: 4MB
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

pub type WorkerId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentState {
    Pending,
    Reserved,
    Finished,
}

/// 分片信息
#[derive(Debug, Clone)]
pub struct Fragment {
    /// 分片索引
    pub index: usize,
    /// 起始偏移（包含）
    pub start: u64,
    /// 结束偏移（不包含）
    pub end: u64,
    pub state: FragmentState,
    /// 持有该分片的 Worker
    pub owner: Option<WorkerId>,
    /// 已重试次数
    pub retries: u32,
}

impl Fragment {
    fn new(index: usize, range: Range<u64>) -> Self {
        Self {
            index,
            start: range.start,
            end: range.end,
            state: FragmentState::Pending,
            owner: None,
            retries: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Range` 请求头的值（闭区间）
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// 分片状态快照，用于进度上报
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSnapshot {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub state: FragmentState,
}

#[derive(Debug, Clone)]
pub struct FragmentAllocator {
    fragments: Vec<Fragment>,
    file_size: u64,
    chunk_size: u64,
    /// 单流模式：远端不支持 Range，整个文件一个分片
    full_stream: bool,
}

impl FragmentAllocator {
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut fragments = Vec::new();
        let mut start = 0u64;
        while start < file_size {
            let end = (start + chunk_size).min(file_size);
            fragments.push(Fragment::new(fragments.len(), start..end));
            start = end;
        }

        Self {
            fragments,
            file_size,
            chunk_size,
            full_stream: false,
        }
    }

    /// 单流模式：一个覆盖整个文件的分片
    pub fn single_stream(file_size: u64) -> Self {
        let mut allocator = Self::new(file_size, file_size.max(1));
        allocator.full_stream = true;
        allocator
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn is_full_stream(&self) -> bool {
        self.full_stream
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn fragment(&self, index: usize) -> Option<&Fragment> {
        self.fragments.get(index)
    }

    /// 预留起始偏移最小的待下载分片
    pub fn reserve_next(&mut self, worker: WorkerId) -> Option<Fragment> {
        let fragment = self
            .fragments
            .iter_mut()
            .find(|f| f.state == FragmentState::Pending)?;
        fragment.state = FragmentState::Reserved;
        fragment.owner = Some(worker);
        Some(fragment.clone())
    }

    fn reserved_by(&mut self, index: usize, worker: WorkerId) -> Result<&mut Fragment> {
        let fragment = self
            .fragments
            .get_mut(index)
            .ok_or_else(|| DownloadError::InvalidTransition(format!("分片 #{} 不存在", index)))?;
        if fragment.state != FragmentState::Reserved || fragment.owner != Some(worker) {
            return Err(DownloadError::InvalidTransition(format!(
                "分片 #{} 未被 Worker #{} 持有 (状态 {:?}, 持有者 {:?})",
                index, worker, fragment.state, fragment.owner
            )));
        }
        Ok(fragment)
    }

    /// reserved -> finished
    pub fn complete(&mut self, index: usize, worker: WorkerId) -> Result<()> {
        let fragment = self.reserved_by(index, worker)?;
        fragment.state = FragmentState::Finished;
        fragment.owner = None;
        Ok(())
    }

    /// reserved -> pending（Worker 中途退出时归还）
    pub fn release(&mut self, index: usize, worker: WorkerId) -> Result<()> {
        let fragment = self.reserved_by(index, worker)?;
        fragment.state = FragmentState::Pending;
        fragment.owner = None;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.fragments.iter().all(|f| f.state == FragmentState::Finished)
    }

    pub fn reserved_count(&self) -> usize {
        self.fragments
            .iter()
            .filter(|f| f.state == FragmentState::Reserved)
            .count()
    }

    pub fn finished_count(&self) -> usize {
        self.fragments
            .iter()
            .filter(|f| f.state == FragmentState::Finished)
            .count()
    }

    pub fn finished_bytes(&self) -> u64 {
        self.fragments
            .iter()
            .filter(|f| f.state == FragmentState::Finished)
            .map(Fragment::len)
            .sum()
    }

    /// 重启：所有未完成分片回到 pending，丢弃在途预留
    ///
    /// 返回被回收的预留数量
    pub fn reset_unfinished(&mut self) -> usize {
        let mut released = 0;
        for fragment in &mut self.fragments {
            if fragment.state == FragmentState::Reserved {
                released += 1;
            }
            if fragment.state != FragmentState::Finished {
                fragment.state = FragmentState::Pending;
                fragment.owner = None;
                fragment.retries = 0;
            }
        }
        released
    }

    /// 断点续传：把已完成的分片直接标记为 finished
    ///
    /// 越界索引被忽略，返回实际标记的数量
    pub fn seed_finished(&mut self, finished: &BitSet) -> usize {
        let mut seeded = 0;
        for index in finished.iter() {
            if let Some(fragment) = self.fragments.get_mut(index) {
                if fragment.state == FragmentState::Pending {
                    fragment.state = FragmentState::Finished;
                    seeded += 1;
                }
            }
        }
        seeded
    }

    pub fn finished_set(&self) -> BitSet {
        self.fragments
            .iter()
            .filter(|f| f.state == FragmentState::Finished)
            .map(|f| f.index)
            .collect()
    }

    /// 记录一次失败，返回累计重试次数
    pub fn record_retry(&mut self, index: usize) -> u32 {
        match self.fragments.get_mut(index) {
            Some(fragment) => {
                fragment.retries += 1;
                fragment.retries
            }
            None => 0,
        }
    }

    pub fn snapshots(&self) -> Vec<FragmentSnapshot> {
        self.fragments
            .iter()
            .map(|f| FragmentSnapshot {
                index: f.index,
                start: f.start,
                end: f.end,
                state: f.state,
            })
            .collect()
    }
}
