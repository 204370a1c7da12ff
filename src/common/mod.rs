//! 公共模块
//!
//! 跨流水线使用的通用组件

mod detached;
mod format;
mod keyed_lock;
mod recompute_limiter;
mod throttle;

pub use detached::spawn_detached;
pub use format::format_bytes;
pub use keyed_lock::{KeyGuard, KeyedLocks};
pub use recompute_limiter::{RecomputeLimiter, DEFAULT_RECOMPUTE_WINDOW_SECS};
pub use throttle::{ProgressThrottler, DEFAULT_THROTTLE_INTERVAL_MS};
