//! 信号注册表
//!
//! 按任务 ID 管理暂停/取消句柄。进程内构造一次，注入到各流水线。
//! 对未知 ID 的 pause/resume/cancel 静默忽略，调用方可能与任务结束竞争。

use super::handle::SignalHandle;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 信号注册表
#[derive(Debug, Default)]
pub struct SignalRegistry {
    handles: DashMap<String, SignalHandle>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或创建句柄（幂等）
    pub fn acquire(&self, task_id: &str) -> SignalHandle {
        self.handles
            .entry(task_id.to_string())
            .or_insert_with(|| {
                debug!("注册信号句柄: task_id={}", task_id);
                SignalHandle::new(task_id)
            })
            .clone()
    }

    /// 获取句柄并返回租约，租约 drop 时自动释放
    pub fn lease(self: &Arc<Self>, task_id: &str) -> SignalLease {
        let handle = self.acquire(task_id);
        SignalLease {
            registry: Arc::clone(self),
            handle,
        }
    }

    pub fn get(&self, task_id: &str) -> Option<SignalHandle> {
        self.handles.get(task_id).map(|h| h.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.handles.contains_key(task_id)
    }

    pub fn pause(&self, task_id: &str) -> bool {
        match self.handles.get(task_id) {
            Some(handle) => handle.pause(),
            None => false,
        }
    }

    pub fn resume(&self, task_id: &str) -> bool {
        match self.handles.get(task_id) {
            Some(handle) => handle.resume(),
            None => false,
        }
    }

    /// 取消任务，返回任务是否存在
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.handles.get(task_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// 外部释放句柄
    pub fn release(&self, task_id: &str) -> bool {
        self.handles.remove(task_id).is_some()
    }

    /// 只释放指定实例；ID 已被重新注册时不误删新句柄
    pub fn release_handle(&self, handle: &SignalHandle) -> bool {
        self.handles
            .remove_if(handle.task_id(), |_, current| current.same_as(handle))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.handles.iter().map(|e| e.key().clone()).collect()
    }

    /// 取消并清空所有句柄
    pub fn shutdown(&self) {
        let count = self.handles.len();
        for entry in self.handles.iter() {
            entry.value().cancel();
        }
        self.handles.clear();
        if count > 0 {
            info!("信号注册表已关闭，取消了 {} 个任务", count);
        }
    }
}

/// 信号租约（RAII）
///
/// 流水线持有租约直到任务进入终态；drop 时只移除自己注册的那个句柄
#[derive(Debug)]
pub struct SignalLease {
    registry: Arc<SignalRegistry>,
    handle: SignalHandle,
}

impl SignalLease {
    pub fn handle(&self) -> &SignalHandle {
        &self.handle
    }
}

impl Drop for SignalLease {
    fn drop(&mut self) {
        if self.registry.release_handle(&self.handle) {
            debug!("释放信号句柄: task_id={}", self.handle.task_id());
        }
    }
}
