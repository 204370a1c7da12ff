//! 远端存储
//!
//! - `api.rs`: 存储 API trait（外部客户端实现）
//! - `memory.rs`: 进程内实现
//! - `types.rs`: 文件、目录、范围等数据类型

mod api;
mod memory;
mod types;

pub use api::StorageApi;
pub use memory::MemoryStorage;
pub use types::*;
