//! 缓存模块
//!
//! - `store.rs`: 键值存储 trait 与内存实现
//! - `sqlite.rs`: SQLite 实现（r2d2 连接池）
//! - `metadata.rs`: 目录大小（限流重算）与名称缓存

mod metadata;
mod sqlite;
mod store;

pub use metadata::{directory_size_key, Cached, Freshness, MetadataCache};
pub use sqlite::{DbPool, SqliteKvStore};
pub use store::{get_json, put_json, KvStore, MemoryKvStore};
