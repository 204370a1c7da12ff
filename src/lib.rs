// Drive Transfer Library
// 网盘客户端传输与打包核心库

// 错误类型
pub mod error;

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 公共模块（节流、按 key 加锁、后台任务等）
pub mod common;

// 任务信号（暂停/取消）
pub mod signal;

// 传输事件
pub mod events;

// 任务生命周期
pub mod task;

// 远端存储接口
pub mod storage;

// 持久化缓存与目录大小缓存
pub mod cache;

// 目录树遍历与扁平化
pub mod tree;

// 上传流水线
pub mod upload;

// 下载流水线
pub mod download;

// 流式打包
pub mod archive;

// 缩略图缓存
pub mod thumbnail;

// 统一入口
pub mod manager;

// 导出常用类型
pub use archive::{ArchiveBuilder, ArchiveSummary};
pub use cache::{Cached, Freshness, KvStore, MemoryKvStore, MetadataCache, SqliteKvStore};
pub use config::AppConfig;
pub use download::{DownloadPipeline, FileSink, MemorySink, TransferSink, WriterSink};
pub use error::{ConstituentFailure, Result, TransferError};
pub use events::{EventSink, TransferEvent};
pub use manager::{TaskHandle, TransferManager};
pub use signal::{SignalHandle, SignalRegistry};
pub use storage::{MemoryStorage, RemoteDirectory, RemoteFile, RemoteItem, StorageApi};
pub use task::{TaskState, TransferTask};
pub use thumbnail::{ThumbnailCache, ThumbnailKind, ThumbnailRequest};
pub use upload::{FailurePolicy, UploadPipeline, UploadRequest, UploadSource};
