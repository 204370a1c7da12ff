//! 传输任务
//!
//! - `types.rs`: 任务描述与快照
//! - `tracker.rs`: 生命周期追踪与事件发出，`TaskEnv` / `TaskRun` 负责信号句柄的登记与释放

mod tracker;
mod types;

pub use tracker::{TaskEnv, TaskRun, TaskTracker};
pub use types::{TargetKind, TaskKind, TaskSpec, TaskState, TransferTask};
