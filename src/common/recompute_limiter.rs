//! 重算限流器
//!
//! 按 key 限制昂贵聚合（目录大小等）的权威重算频率：
//! 1. 每个 key 在窗口期内最多重算一次
//! 2. 同一 key 的并发请求排队在 key 级互斥锁后面，合并为一次重算
//!
//! 时间基于 `tokio::time::Instant`，测试中可以用 `tokio::time::pause` 推进。

use super::keyed_lock::{KeyGuard, KeyedLocks};
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// 默认重算窗口（秒）
pub const DEFAULT_RECOMPUTE_WINDOW_SECS: u64 = 30;

/// 重算限流器
#[derive(Debug)]
pub struct RecomputeLimiter {
    window: Duration,
    /// key -> 上次权威重算时间
    last_recompute: DashMap<String, Instant>,
    locks: KeyedLocks<String>,
}

impl RecomputeLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_recompute: DashMap::new(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 获取 key 级互斥锁
    pub async fn lock(&self, key: &str) -> KeyGuard<'_, String> {
        self.locks.lock(key.to_string()).await
    }

    /// 是否需要重算（从未算过或已过窗口期）
    pub fn is_due(&self, key: &str) -> bool {
        match self.last_recompute.get(key) {
            Some(last) => last.elapsed() >= self.window,
            None => true,
        }
    }

    /// 记录一次成功的重算
    pub fn mark_recomputed(&self, key: &str) {
        self.last_recompute.insert(key.to_string(), Instant::now());
    }

    /// 清除 key 的时间戳，下次请求必然重算
    pub fn forget(&self, key: &str) {
        self.last_recompute.remove(key);
    }

    /// 距上次重算的时长
    pub fn since_last(&self, key: &str) -> Option<Duration> {
        self.last_recompute.get(key).map(|last| last.elapsed())
    }
}

impl Default for RecomputeLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_RECOMPUTE_WINDOW_SECS))
    }
}
