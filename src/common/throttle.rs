//! 进度事件节流器
//!
//! 控制进度事件的发布频率，避免事件风暴。间隔为 0 时不节流。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进度事件节流器
///
/// 典型用法：每次进度推进时调用 `should_emit()`，返回 true 才发布；
/// 终态前调用 `force_emit()` 保证最后一个进度值不会被吞掉
#[derive(Debug)]
pub struct ProgressThrottler {
    /// 创建时刻，作为时间基准
    origin: Instant,
    /// 上次发布距 origin 的纳秒数（+1，0 表示从未发布）
    last_emit_nanos: AtomicU64,
    /// 节流间隔（纳秒）
    interval_nanos: u64,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_emit_nanos: AtomicU64::new(0),
            interval_nanos: interval.as_nanos() as u64,
        }
    }

    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 不节流
    pub fn disabled() -> Self {
        Self::with_millis(0)
    }

    pub fn is_disabled(&self) -> bool {
        self.interval_nanos == 0
    }

    /// 距上次发布超过间隔则返回 true 并更新时间戳
    pub fn should_emit(&self) -> bool {
        if self.is_disabled() {
            return true;
        }
        let now = self.now_nanos();
        let last = self.last_emit_nanos.load(Ordering::Relaxed);
        if last != 0 && now.saturating_sub(last) < self.interval_nanos {
            return false;
        }
        self.last_emit_nanos
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 强制发布（终态前的最后一次进度）
    pub fn force_emit(&self) -> bool {
        self.last_emit_nanos.store(self.now_nanos(), Ordering::Relaxed);
        true
    }

    pub fn reset(&self) {
        self.last_emit_nanos.store(0, Ordering::Relaxed);
    }

    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64 + 1
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}
