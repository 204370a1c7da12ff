//! 事件模块
//!
//! - `types.rs`: 任务生命周期事件
//! - `sink.rs`: 事件接收端（通道、日志、内存、广播）

mod sink;
mod types;

pub use sink::*;
pub use types::*;
