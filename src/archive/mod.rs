//! 归档模块
//!
//! - `job.rs`: 合并多个来源并规划成员路径
//! - `encoder.rs`: ZIP 流式编码
//! - `builder.rs`: 打包任务

mod builder;
mod encoder;
mod job;

pub use builder::{ArchiveBuilder, ArchiveOptions, ArchiveSummary};
pub use encoder::{streaming_encoder, ArchiveEncoder};
pub use job::{archive_root_name, plan_archive, ArchiveJob, DEFAULT_ARCHIVE_ROOT};
