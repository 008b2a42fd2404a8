//! 下载停滞检测
//!
//! 按固定间隔采样单个文件的吞吐量，低于阈值并持续一定时长即判定为停滞。
//! 启动后的一段时间内不检测，避免握手和首包阶段误判。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// 停滞检测配置
#[derive(Clone, Debug)]
pub struct StallConfig {
    /// 检查间隔（秒）
    pub check_interval_secs: u64,
    /// 速度阈值（字节/秒），低于此值视为慢速
    pub min_speed: u64,
    /// 持续时长阈值（秒）
    pub duration_threshold_secs: u64,
    /// 启动延迟（秒）
    pub startup_delay_secs: u64,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            min_speed: 10 * 1024, // 10KB/s
            duration_threshold_secs: 30,
            startup_delay_secs: 10,
        }
    }
}

#[derive(Debug)]
pub struct StallMonitor {
    /// 慢速累计持续时间（秒）
    slow_duration_secs: AtomicU64,
    started: Instant,
    config: StallConfig,
}

impl StallMonitor {
    pub fn new(config: StallConfig) -> Self {
        Self {
            slow_duration_secs: AtomicU64::new(0),
            started: Instant::now(),
            config,
        }
    }

    pub fn config(&self) -> &StallConfig {
        &self.config
    }

    /// 记录一次采样
    ///
    /// # 返回
    /// - `true`: 已持续慢速超过阈值，判定为停滞（计数随即清零）
    /// - `false`: 正常或尚未达到阈值
    pub fn observe(&self, current_speed: f64) -> bool {
        if self.started.elapsed().as_secs() < self.config.startup_delay_secs {
            return false;
        }

        if current_speed >= self.config.min_speed as f64 {
            self.slow_duration_secs.store(0, Ordering::SeqCst);
            return false;
        }

        let prev = self
            .slow_duration_secs
            .fetch_add(self.config.check_interval_secs, Ordering::SeqCst);
        let duration = prev + self.config.check_interval_secs;

        debug!(
            "下载速度偏低: 当前 {:.2} KB/s, 阈值 {:.2} KB/s, 持续 {}秒",
            current_speed / 1024.0,
            self.config.min_speed as f64 / 1024.0,
            duration
        );

        if duration >= self.config.duration_threshold_secs {
            warn!(
                "⚠️ 检测到下载停滞: 当前 {:.2} KB/s, 持续 {}秒",
                current_speed / 1024.0,
                duration
            );
            self.slow_duration_secs.store(0, Ordering::SeqCst);
            return true;
        }

        false
    }

    /// 重启后重新计时
    pub fn reset(&mut self) {
        self.slow_duration_secs.store(0, Ordering::SeqCst);
        self.started = Instant::now();
    }
}
