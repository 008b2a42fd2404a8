//! 断点续传元数据
//!
//! 目标文件在下载前已按完整大小预分配，无法仅凭文件长度推断完成进度，
//! 因此每个文件旁边保存一个分片完成记录：`{目标文件}.fragments.json`
//!
//! ```json
//! {
//!   "version": 1,
//!   "item_id": "xxx",
//!   "file_size": 10485760,
//!   "chunk_size": 1048576,
//!   "finished": [0, 1, 2, 5],
//!   "updated_at": "2026-01-01T00:00:00Z"
//! }
//! ```

use super::fragment::FragmentAllocator;
use bit_set::BitSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const RESUME_STATE_VERSION: u32 = 1;

const SIDECAR_SUFFIX: &str = ".fragments.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    pub version: u32,
    pub item_id: String,
    pub file_size: u64,
    pub chunk_size: u64,
    /// 已完成的分片索引
    pub finished: Vec<usize>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeState {
    pub fn from_allocator(item_id: &str, allocator: &FragmentAllocator) -> Self {
        Self {
            version: RESUME_STATE_VERSION,
            item_id: item_id.to_string(),
            file_size: allocator.file_size(),
            chunk_size: allocator.chunk_size(),
            finished: allocator.finished_set().iter().collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn finished_set(&self) -> BitSet {
        self.finished.iter().copied().collect()
    }
}

/// 元数据文件路径：`{destination}.fragments.json`
pub fn sidecar_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// 先写临时文件再原子重命名
pub fn save_resume_state(destination: &Path, state: &ResumeState) -> io::Result<()> {
    let path = sidecar_path(destination);
    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, &path)?;
    debug!(
        "已保存续传记录: {:?} ({} 个分片已完成)",
        path,
        state.finished.len()
    );
    Ok(())
}

/// 读取续传记录，文件不存在或损坏时返回 None
pub fn load_resume_state(destination: &Path) -> Option<ResumeState> {
    let path = sidecar_path(destination);
    let file = File::open(&path).ok()?;
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("续传记录损坏，忽略: {:?}, 错误: {}", path, e);
            None
        }
    }
}

pub fn remove_resume_state(destination: &Path) -> io::Result<()> {
    match fs::remove_file(sidecar_path(destination)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// 判断能否从续传记录恢复
///
/// 要求记录与当前文件大小、分片大小一致，且本地文件存在并已预分配到完整长度。
/// 任一条件不满足都返回 None，由调用方从头下载。
pub fn restore_finished(
    destination: &Path,
    item_id: &str,
    file_size: u64,
    chunk_size: u64,
) -> Option<BitSet> {
    let state = load_resume_state(destination)?;

    if state.version != RESUME_STATE_VERSION
        || state.item_id != item_id
        || state.file_size != file_size
        || state.chunk_size != chunk_size
    {
        warn!(
            "续传记录与当前文件不匹配，重新下载: {:?} (记录 size={}, chunk={}; 当前 size={}, chunk={})",
            destination, state.file_size, state.chunk_size, file_size, chunk_size
        );
        return None;
    }

    let on_disk = fs::metadata(destination).map(|m| m.len()).unwrap_or(0);
    if on_disk != file_size {
        warn!(
            "本地文件长度 {} 与期望 {} 不符，重新下载: {:?}",
            on_disk, file_size, destination
        );
        return None;
    }

    info!(
        "🔄 从续传记录恢复: {:?}, 已完成 {} 个分片",
        destination,
        state.finished.len()
    );
    Some(state.finished_set())
}
