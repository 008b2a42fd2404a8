//! 公共模块
//!
//! 提供跨模块使用的通用组件

mod speed_tracker;
mod stall_monitor;

pub use speed_tracker::{Histogram, SpeedTracker, UpdateMode};
pub use stall_monitor::{StallConfig, StallMonitor};
