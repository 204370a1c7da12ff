//! 下载模块
//!
//! - `sink.rs`: 下载目标（本地文件、通用流、内存）
//! - `reader.rs`: 分片拉取
//! - `pipeline.rs`: 单文件与文件夹下载

mod pipeline;
mod reader;
mod sink;

pub use pipeline::{DirectoryDownloadReport, DownloadOptions, DownloadPipeline};
pub use reader::ChunkReader;
pub use sink::{
    part_path, BufferStatus, FileSink, MemoryBuffer, MemorySink, TransferSink, WriterSink,
};
