//! 全局吞吐量统计
//!
//! 所有下载器共享一个增量模式的 [`SpeedTracker`]，外加进程生命周期内的总字节数。

use crate::common::{SpeedTracker, UpdateMode};
use crate::events::DownloadManagerStats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// 速度取最近几秒的平均值
pub const SPEED_WINDOW_SECS: u64 = 5;
/// 直方图覆盖的时间范围
pub const HISTOGRAM_WINDOW_SECS: u64 = 60;
/// 超过该时长的秒桶被淘汰
pub const RETENTION_SECS: u64 = 300;

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug)]
pub struct AggregateStats {
    tracker: Mutex<SpeedTracker>,
    lifetime_bytes: AtomicU64,
}

impl Default for AggregateStats {
    fn default() -> Self {
        Self {
            tracker: Mutex::new(SpeedTracker::new(0, UpdateMode::Incremental)),
            lifetime_bytes: AtomicU64::new(0),
        }
    }
}

impl AggregateStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, timestamp_ms: u64, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.lifetime_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.tracker.lock().update(timestamp_ms, bytes);
    }

    pub fn lifetime_bytes(&self) -> u64 {
        self.lifetime_bytes.load(Ordering::Relaxed)
    }

    /// 生成当前统计快照，同时淘汰过期秒桶
    pub fn snapshot(&self, now_ms: u64) -> DownloadManagerStats {
        let mut tracker = self.tracker.lock();
        // 空闲时也要推进时间轴，否则速度会停留在最后一次有数据的值
        tracker.update(now_ms, 0);
        tracker.forget_older_than((now_ms / 1000).saturating_sub(RETENTION_SECS));

        let speed = tracker.query(
            Some(now_ms.saturating_sub((SPEED_WINDOW_SECS - 1) * 1000)),
            Some(now_ms),
        );
        let histogram = tracker.histogram(
            Some(now_ms.saturating_sub(HISTOGRAM_WINDOW_SECS * 1000)),
            Some(now_ms),
            1,
        );

        DownloadManagerStats {
            lifetime_bytes: self.lifetime_bytes(),
            speed,
            histogram,
        }
    }
}
