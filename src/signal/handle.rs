//! 暂停/取消控制句柄

use crate::error::{Result, TransferError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// 暂停控制
///
/// 布尔状态 + 唤醒机制（watch 通道），暂停期间所有读写在 checkpoint 处阻塞
#[derive(Debug, Clone)]
pub struct PauseControl {
    state: Arc<watch::Sender<bool>>,
}

impl PauseControl {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// 暂停，返回状态是否发生变化
    pub fn pause(&self) -> bool {
        self.state.send_if_modified(|paused| {
            if *paused {
                false
            } else {
                *paused = true;
                true
            }
        })
    }

    /// 恢复，返回状态是否发生变化
    pub fn resume(&self) -> bool {
        self.state.send_if_modified(|paused| {
            if *paused {
                *paused = false;
                true
            } else {
                false
            }
        })
    }

    pub fn is_paused(&self) -> bool {
        *self.state.borrow()
    }

    /// 等待恢复；等待期间被取消则返回 Cancelled
    async fn wait_resumed(&self, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.state.subscribe();
        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            if !*rx.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // 发送端不可能先于句柄释放，保守地视为已恢复
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct SignalInner {
    task_id: String,
    pause: PauseControl,
    cancel: CancellationToken,
}

/// 信号句柄：某个任务的（暂停, 取消）控制对
///
/// Clone 共享同一组控制；注册表只按 ID 查找，不拥有任务本身
#[derive(Debug, Clone)]
pub struct SignalHandle {
    inner: Arc<SignalInner>,
}

impl SignalHandle {
    pub(crate) fn new(task_id: &str) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                task_id: task_id.to_string(),
                pause: PauseControl::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// 不进入注册表的独立句柄（缩略图预生成等内部任务使用）
    pub fn detached(label: &str) -> Self {
        Self::new(label)
    }

    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    pub fn pause_control(&self) -> &PauseControl {
        &self.inner.pause
    }

    /// 取消令牌（可传给存储 API 以中断进行中的请求）
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn pause(&self) -> bool {
        self.inner.pause.pause()
    }

    pub fn resume(&self) -> bool {
        self.inner.pause.resume()
    }

    /// 取消（一次性、幂等）
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pause.is_paused()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// 挂起点：每次分片读写前调用
    ///
    /// - 已取消：立即返回 `Cancelled`
    /// - 已暂停：阻塞直到恢复或取消
    pub async fn checkpoint(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if self.inner.pause.is_paused() {
            self.inner.pause.wait_resumed(&self.inner.cancel).await?;
        }
        Ok(())
    }

    /// 是否为同一个句柄实例
    pub fn same_as(&self, other: &SignalHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checkpoint_passes_when_idle() {
        let handle = SignalHandle::new("t1");
        assert!(handle.checkpoint().await.is_ok());
    }

    #[tokio::test]
    async fn test_checkpoint_fails_after_cancel() {
        let handle = SignalHandle::new("t1");
        handle.cancel();
        handle.cancel();
        assert!(handle.checkpoint().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_checkpoint_blocks_while_paused() {
        let handle = SignalHandle::new("t1");
        assert!(handle.pause());
        assert!(!handle.pause());

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.checkpoint().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        assert!(handle.resume());
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_waiter() {
        let handle = SignalHandle::new("t1");
        handle.pause();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.checkpoint().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }
}
