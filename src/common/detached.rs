//! 后台分离任务
//!
//! 用于"发出即不管"的副作用（例如上传后预生成缩略图）：
//! 结果不影响调用方的成功与否，但失败一定要落日志，不能静默丢弃。

use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 启动分离任务，失败只记录警告
pub fn spawn_detached<F, T, E>(label: impl Into<String>, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let label = label.into();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => debug!("后台任务完成: {}", label),
            Err(e) => warn!("后台任务失败（已忽略）: {}, 错误: {}", label, e),
        }
    })
}
