//! 归档流式构建
//!
//! 多个远端文件/文件夹打包成一个 ZIP 流写入下游目标，整体作为一个下载任务：
//! 总大小在写出前确定，进度跨成员累计。任一成员读取失败时编码器和目标一起中止，
//! 不会留下被截断却看似完整的归档。

use super::encoder::streaming_encoder;
use super::job::{archive_root_name, plan_archive, ArchiveJob};
use crate::common::format_bytes;
use crate::download::{ChunkReader, TransferSink};
use crate::error::Result;
use crate::signal::SignalHandle;
use crate::storage::{ItemScope, RemoteItem, StorageApi};
use crate::task::{TargetKind, TaskEnv, TaskKind, TaskSpec, TaskTracker};
use crate::tree::TreeWalker;
use std::sync::Arc;
use tracing::{error, info};

/// 归档参数
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// 每次从存储拉取的字节数
    pub chunk_size: u64,
    /// 展开目录时的并发列目录数
    pub max_concurrent_listings: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_concurrent_listings: 8,
        }
    }
}

/// 归档结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// 归档内根目录名
    pub root: String,
    /// 写入的成员数
    pub entries: usize,
    /// 成员原始字节总数
    pub bytes: u64,
    /// 写给目标的归档字节数
    pub archive_bytes: u64,
    /// 因路径冲突改名的成员数
    pub renamed: usize,
}

#[derive(Clone)]
pub struct ArchiveBuilder {
    storage: Arc<dyn StorageApi>,
    env: TaskEnv,
    options: ArchiveOptions,
}

impl ArchiveBuilder {
    pub fn new(storage: Arc<dyn StorageApi>, env: TaskEnv, options: ArchiveOptions) -> Self {
        Self {
            storage,
            env,
            options,
        }
    }

    /// 把 `items` 打包写入 `sink`
    ///
    /// 成员名为 `<root>/<相对路径>`；空输入得到一个合法的空归档
    pub async fn build_archive(
        &self,
        items: Vec<RemoteItem>,
        scope: ItemScope,
        mut sink: Box<dyn TransferSink>,
        root_name: &str,
        task_id: Option<String>,
    ) -> Result<ArchiveSummary> {
        let root = archive_root_name(root_name);
        let run = self.env.begin(
            TaskSpec::new(TaskKind::Download, TargetKind::Archive, format!("{}.zip", root))
                .with_id(task_id),
        );

        let encoded = async {
            let walker = TreeWalker::new(
                self.storage.clone(),
                scope,
                self.options.max_concurrent_listings,
            );
            let job = plan_archive(&walker, items, root, run.signal()).await?;
            run.start(job.total_size());
            info!(
                "开始打包: {}.zip ({} 个成员, {})",
                job.root,
                job.member_count(),
                format_bytes(job.total_size())
            );
            self.encode(&job, sink.as_mut(), run.signal(), run.tracker())
                .await
        }
        .await;

        let result = match encoded {
            Ok(summary) => sink.finish().await.map(|_| summary),
            Err(e) => {
                if !e.is_cancelled() {
                    error!("打包失败: {}, 错误: {}", run.tracker().snapshot().name, e);
                }
                sink.abort(&e).await;
                Err(e)
            }
        };
        run.complete(&result);
        result
    }

    async fn encode(
        &self,
        job: &ArchiveJob,
        sink: &mut dyn TransferSink,
        signal: &SignalHandle,
        tracker: &Arc<TaskTracker>,
    ) -> Result<ArchiveSummary> {
        let mut encoder = streaming_encoder();
        let mut summary = ArchiveSummary {
            root: job.root.clone(),
            entries: 0,
            bytes: 0,
            archive_bytes: 0,
            renamed: job.tree.renamed,
        };

        for entry in job.members() {
            let Some(file) = entry.as_file() else {
                continue;
            };
            signal.checkpoint().await?;
            encoder.start_entry(&job.member_name(entry), file.size)?;

            let mut reader = ChunkReader::new(
                self.storage.clone(),
                file.clone(),
                signal.clone(),
                self.options.chunk_size,
            );
            while let Some(chunk) = reader.next_chunk().await? {
                encoder.write(&chunk)?;
                summary.archive_bytes += forward(encoder.take_output(), sink).await?;
                summary.bytes += chunk.len() as u64;
                tracker.advance(chunk.len() as u64);
            }
            summary.archive_bytes += forward(encoder.take_output(), sink).await?;
            summary.entries += 1;
        }

        summary.archive_bytes += forward(encoder.finish()?, sink).await?;
        Ok(summary)
    }
}

/// 把编码器已产出的字节交给目标
async fn forward(pending: Vec<u8>, sink: &mut dyn TransferSink) -> Result<u64> {
    if pending.is_empty() {
        return Ok(0);
    }
    sink.write(&pending).await?;
    Ok(pending.len() as u64)
}
