//! 吞吐量统计器
//!
//! 按整秒分桶记录字节数，支持区间平均速度查询与直方图查询。
//!
//! - 增量模式：每次 `update` 传入的是自上次以来新增的字节数
//! - 累计模式：每次 `update` 传入的是运行总量，内部通过 `total_data` 换算成增量
//!
//! 缺失的秒桶按 0 计入平均值，网络停顿会拉低速度而不是被忽略。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 更新模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// 传入增量
    Incremental,
    /// 传入累计总量
    Cumulative,
}

/// 吞吐量直方图
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    /// 起始秒（epoch 秒）
    pub start_epoch: u64,
    /// 结束秒（包含）
    pub end_epoch: u64,
    /// 每个窗口内的字节数之和
    pub values: Vec<u64>,
}

impl Histogram {
    fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct SpeedTracker {
    /// epoch 秒 -> 该秒内记录的字节数
    buckets: BTreeMap<u64, u64>,
    /// 运行总量（累计模式换算增量用）
    total_data: u64,
    /// 初始偏移（断点续传时已有的字节数）
    initial_offset: u64,
    mode: UpdateMode,
}

impl SpeedTracker {
    pub fn new(initial_offset: u64, mode: UpdateMode) -> Self {
        Self {
            buckets: BTreeMap::new(),
            total_data: initial_offset,
            initial_offset,
            mode,
        }
    }

    /// 增量模式的快捷构造
    pub fn incremental() -> Self {
        Self::new(0, UpdateMode::Incremental)
    }

    pub fn total_data(&self) -> u64 {
        self.total_data
    }

    pub fn initial_offset(&self) -> u64 {
        self.initial_offset
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// 记录一次数据
    ///
    /// `timestamp_ms` 为毫秒时间戳，数据落入 `timestamp_ms / 1000` 秒桶。
    /// 累计模式下若传入总量小于已记录总量（例如分片重试丢弃了半截数据），
    /// 只重新对齐基准，不产生负增量。
    pub fn update(&mut self, timestamp_ms: u64, data_length: u64) {
        let delta = match self.mode {
            UpdateMode::Incremental => {
                self.total_data = self.total_data.saturating_add(data_length);
                data_length
            }
            UpdateMode::Cumulative => {
                if data_length < self.total_data {
                    self.total_data = data_length;
                    return;
                }
                let delta = data_length - self.total_data;
                self.total_data = data_length;
                delta
            }
        };

        let epoch = timestamp_ms / 1000;
        *self.buckets.entry(epoch).or_insert(0) += delta;
    }

    /// 把毫秒区间换算成被记录范围内的秒区间
    fn clamp_range(&self, from_ms: Option<u64>, until_ms: Option<u64>) -> Option<(u64, u64)> {
        let first = *self.buckets.keys().next()?;
        let last = *self.buckets.keys().next_back()?;

        let lo = from_ms.map(|ms| ms / 1000).unwrap_or(first).max(first);
        let hi = until_ms.map(|ms| ms / 1000).unwrap_or(last).min(last);

        if lo > hi {
            return None;
        }
        Some((lo, hi))
    }

    /// 区间平均速度（字节/秒）
    ///
    /// 区间为闭区间，缺省端点取已记录数据的边界，且总是裁剪到已记录的秒范围内。
    pub fn query(&self, from_ms: Option<u64>, until_ms: Option<u64>) -> f64 {
        let Some((lo, hi)) = self.clamp_range(from_ms, until_ms) else {
            return 0.0;
        };

        let sum: u64 = self.buckets.range(lo..=hi).map(|(_, v)| *v).sum();
        let span = hi - lo + 1;
        sum as f64 / span as f64
    }

    /// 直方图查询
    ///
    /// `values[i]` 是从 `start_epoch + i * granularity` 开始的窗口内字节数之和，
    /// 最后一个窗口可能不满。`granularity` 为 0 时按 1 处理。
    pub fn histogram(&self, from_ms: Option<u64>, until_ms: Option<u64>, granularity: u64) -> Histogram {
        let Some((lo, hi)) = self.clamp_range(from_ms, until_ms) else {
            return Histogram::empty();
        };

        let granularity = granularity.max(1);
        let span = hi - lo + 1;
        let windows = span.div_ceil(granularity) as usize;
        let mut values = vec![0u64; windows];

        for (epoch, bytes) in self.buckets.range(lo..=hi) {
            let slot = ((epoch - lo) / granularity) as usize;
            values[slot] += bytes;
        }

        Histogram {
            start_epoch: lo,
            end_epoch: hi,
            values,
        }
    }

    /// 淘汰早于 `epoch` 的秒桶
    pub fn forget_older_than(&mut self, epoch: u64) {
        self.buckets = self.buckets.split_off(&epoch);
    }

    /// 重启后清空统计
    pub fn resume(&mut self) {
        self.buckets.clear();
        self.total_data = self.initial_offset;
    }

    /// 以新的起点重启统计（累计模式下传入重启时已落盘的字节数）
    pub fn resume_at(&mut self, offset: u64) {
        self.initial_offset = offset;
        self.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> SpeedTracker {
        let mut tracker = SpeedTracker::new(0, UpdateMode::Incremental);
        tracker.update(1000, 10);
        tracker.update(2000, 20);
        tracker.update(3000, 30);
        tracker
    }

    #[test]
    fn test_query_mean() {
        let tracker = sample();
        assert_eq!(tracker.query(None, None), 20.0);
    }

    #[test]
    fn test_query_empty() {
        let tracker = SpeedTracker::incremental();
        assert_eq!(tracker.query(None, None), 0.0);
        assert_eq!(tracker.query(Some(0), Some(10_000)), 0.0);
    }

    #[test]
    fn test_query_single_bucket() {
        let tracker = sample();
        assert_eq!(tracker.query(Some(2000), Some(2999)), 20.0);

        let mut sparse = SpeedTracker::incremental();
        sparse.update(1000, 10);
        sparse.update(5000, 50);
        // 3 秒没有数据
        assert_eq!(sparse.query(Some(3000), Some(3000)), 0.0);
    }

    #[test]
    fn test_missing_buckets_count_as_zero() {
        let mut tracker = SpeedTracker::incremental();
        tracker.update(1000, 100);
        tracker.update(4000, 100);
        // (100 + 0 + 0 + 100) / 4
        assert_eq!(tracker.query(None, None), 50.0);
    }

    #[test]
    fn test_histogram_clamped_to_recorded() {
        let tracker = sample();
        let hist = tracker.histogram(Some(1000), Some(5000), 1);
        assert_eq!(
            hist,
            Histogram {
                start_epoch: 1,
                end_epoch: 3,
                values: vec![10, 20, 30],
            }
        );
    }

    #[test]
    fn test_histogram_granularity() {
        let tracker = sample();
        let hist = tracker.histogram(None, None, 2);
        assert_eq!(hist.values, vec![30, 30]);

        let hist = tracker.histogram(None, None, 0);
        assert_eq!(hist.values.len(), 3);
    }

    #[test]
    fn test_histogram_empty() {
        let tracker = SpeedTracker::incremental();
        let hist = tracker.histogram(None, None, 1);
        assert_eq!(hist.start_epoch, 0);
        assert_eq!(hist.end_epoch, 0);
        assert!(hist.values.is_empty());
    }

    #[test]
    fn test_cumulative_mode() {
        let mut tracker = SpeedTracker::new(100, UpdateMode::Cumulative);
        tracker.update(1000, 150);
        tracker.update(1500, 200);
        tracker.update(2000, 260);
        assert_eq!(tracker.total_data(), 260);
        assert_eq!(tracker.histogram(None, None, 1).values, vec![100, 60]);

        // 总量回退只重新对齐
        tracker.update(3000, 240);
        tracker.update(3000, 250);
        assert_eq!(tracker.histogram(None, None, 1).values, vec![100, 60, 10]);
    }

    #[test]
    fn test_forget_older_than() {
        let mut tracker = sample();
        tracker.forget_older_than(2);
        assert_eq!(tracker.histogram(None, None, 1).values, vec![20, 30]);
        assert_eq!(tracker.query(None, None), 25.0);
    }

    #[test]
    fn test_resume() {
        let mut tracker = SpeedTracker::new(50, UpdateMode::Cumulative);
        tracker.update(1000, 80);
        tracker.resume();
        assert!(tracker.is_empty());
        assert_eq!(tracker.total_data(), 50);
        assert_eq!(tracker.query(None, None), 0.0);

        tracker.resume_at(70);
        tracker.update(2000, 90);
        assert_eq!(tracker.histogram(None, None, 1).values, vec![20]);
    }

    proptest! {
        #[test]
        fn prop_bucket_sum_matches_total(
            offset in 0u64..1_000_000,
            updates in proptest::collection::vec((0u64..100_000, 0u64..10_000), 0..64),
        ) {
            let mut tracker = SpeedTracker::new(offset, UpdateMode::Incremental);
            for (ts, len) in &updates {
                tracker.update(*ts, *len);
            }
            let sum: u64 = tracker.histogram(None, None, 1).values.iter().sum();
            prop_assert_eq!(sum, tracker.total_data() - tracker.initial_offset());
        }

        #[test]
        fn prop_histogram_length(
            updates in proptest::collection::vec((0u64..60_000, 1u64..100), 1..32),
            granularity in 1u64..7,
        ) {
            let mut tracker = SpeedTracker::incremental();
            for (ts, len) in &updates {
                tracker.update(*ts, *len);
            }
            let hist = tracker.histogram(None, None, granularity);
            let span = hist.end_epoch - hist.start_epoch + 1;
            prop_assert_eq!(hist.values.len() as u64, span.div_ceil(granularity));
        }
    }
}
