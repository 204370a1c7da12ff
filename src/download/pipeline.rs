//! 下载流水线
//!
//! - 单文件：分片拉取 → 写入目标，每片推进进度
//! - 文件夹：枚举 → 扁平化 → 建本地目录 → 并发下载，任一文件失败则整体失败

use super::reader::ChunkReader;
use super::sink::{FileSink, TransferSink};
use crate::common::format_bytes;
use crate::error::{Result, TransferError};
use crate::signal::SignalHandle;
use crate::storage::{ItemScope, RemoteDirectory, RemoteFile, StorageApi};
use crate::task::{TargetKind, TaskEnv, TaskKind, TaskSpec, TaskTracker};
use crate::tree::{flatten, RelativePath, TreeWalker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 下载参数
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 文件夹下载时的并发文件数
    pub max_concurrent_files: usize,
    /// 目录枚举时的并发列目录请求数
    pub max_concurrent_listings: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_concurrent_files: 4,
            max_concurrent_listings: 8,
        }
    }
}

/// 文件夹下载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryDownloadReport {
    /// 本地根目录（`local_root/<目录名>`）
    pub local_root: PathBuf,
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
    /// 因路径冲突改名的文件数
    pub renamed: usize,
}

/// 下载流水线
#[derive(Clone)]
pub struct DownloadPipeline {
    storage: Arc<dyn StorageApi>,
    env: TaskEnv,
    options: DownloadOptions,
}

impl DownloadPipeline {
    pub fn new(storage: Arc<dyn StorageApi>, env: TaskEnv, options: DownloadOptions) -> Self {
        Self {
            storage,
            env,
            options,
        }
    }

    /// 下载单个文件到目标
    pub async fn download_file(
        &self,
        file: RemoteFile,
        sink: Box<dyn TransferSink>,
        task_id: Option<String>,
    ) -> Result<u64> {
        let run = self.env.begin(
            TaskSpec::new(TaskKind::Download, TargetKind::File, file.name.clone()).with_id(task_id),
        );
        run.start(file.size);

        let result = stream_to_sink(
            self.storage.clone(),
            file,
            sink,
            run.signal().clone(),
            run.tracker().clone(),
            self.options.chunk_size,
        )
        .await;

        run.complete(&result);
        result
    }

    /// 下载整个文件夹到 `local_root/<目录名>`
    pub async fn download_directory(
        &self,
        dir: RemoteDirectory,
        scope: ItemScope,
        local_root: PathBuf,
        task_id: Option<String>,
    ) -> Result<DirectoryDownloadReport> {
        let run = self.env.begin(
            TaskSpec::new(TaskKind::Download, TargetKind::Directory, dir.name.clone())
                .with_id(task_id),
        );
        let result = self
            .download_directory_inner(&dir, scope, local_root, run.signal(), run.tracker())
            .await;
        if let Err(e) = &result {
            if !e.is_cancelled() {
                error!("文件夹下载失败: {}, 错误: {}", dir.name, e);
            }
        }
        run.complete(&result);
        result
    }

    async fn download_directory_inner(
        &self,
        dir: &RemoteDirectory,
        scope: ItemScope,
        local_root: PathBuf,
        signal: &SignalHandle,
        tracker: &Arc<TaskTracker>,
    ) -> Result<DirectoryDownloadReport> {
        let walker = TreeWalker::new(
            self.storage.clone(),
            scope,
            self.options.max_concurrent_listings,
        );
        let tree = flatten(walker.walk(dir, signal).await?);
        let total = tree.total_size();
        tracker.start(total);

        let base_name = RelativePath::root().join(&dir.name).to_unrooted();
        let base = local_root.join(base_name);
        tokio::fs::create_dir_all(&base)
            .await
            .map_err(TransferError::from_io_write)?;

        let mut directories = 0;
        for entry in tree.entries.iter().filter(|e| !e.is_file()) {
            tokio::fs::create_dir_all(base.join(entry.path.to_unrooted()))
                .await
                .map_err(TransferError::from_io_write)?;
            directories += 1;
        }

        info!(
            "开始下载文件夹: {} ({} 个文件, {} 个子目录, {})",
            dir.name,
            tree.file_count(),
            directories,
            format_bytes(total)
        );

        let permits = Arc::new(Semaphore::new(self.options.max_concurrent_files.max(1)));
        let mut join_set = JoinSet::new();
        for entry in tree.files() {
            let Some(file) = entry.as_file().cloned() else {
                continue;
            };
            let target = base.join(entry.path.to_unrooted());
            let storage = self.storage.clone();
            let signal = signal.clone();
            let tracker = tracker.clone();
            let permits = permits.clone();
            let chunk_size = self.options.chunk_size;

            join_set.spawn(async move {
                let _permit = tokio::select! {
                    _ = signal.cancel_token().cancelled() => return Err(TransferError::Cancelled),
                    permit = permits.acquire_owned() => permit
                        .map_err(|_| TransferError::Storage("下载许可已关闭".to_string()))?,
                };
                let sink = FileSink::create(&target).await?;
                stream_to_sink(storage, file, Box::new(sink), signal, tracker, chunk_size).await
            });
        }

        let mut first_error: Option<TransferError> = None;
        let mut files = 0;
        let mut bytes = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(written)) => {
                    files += 1;
                    bytes += written;
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        // 整体失败：剩余文件不再下载，FileSink 在 drop 时清理临时文件
                        join_set.abort_all();
                        first_error = Some(e);
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    warn!("下载子任务异常退出: {}", join_err);
                    if first_error.is_none() {
                        join_set.abort_all();
                        first_error = Some(TransferError::SinkWrite(join_err.to_string()));
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(DirectoryDownloadReport {
            local_root: base,
            files,
            directories,
            bytes,
            renamed: tree.renamed,
        })
    }
}

/// 拉取整个文件写入目标；失败或取消时中止目标
async fn stream_to_sink(
    storage: Arc<dyn StorageApi>,
    file: RemoteFile,
    mut sink: Box<dyn TransferSink>,
    signal: SignalHandle,
    tracker: Arc<TaskTracker>,
    chunk_size: u64,
) -> Result<u64> {
    let mut reader = ChunkReader::new(storage, file, signal.clone(), chunk_size);
    let copied: Result<u64> = async {
        let mut written = 0u64;
        while let Some(chunk) = reader.next_chunk().await? {
            signal.checkpoint().await?;
            sink.write(&chunk).await?;
            written += chunk.len() as u64;
            tracker.advance(chunk.len() as u64);
        }
        Ok(written)
    }
    .await;

    match copied {
        Ok(written) => {
            sink.finish().await?;
            Ok(written)
        }
        Err(e) => {
            sink.abort(&e).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{BufferStatus, MemorySink};
    use crate::events::{MemoryEventSink, TransferEvent};
    use crate::signal::SignalRegistry;
    use crate::storage::MemoryStorage;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(chunk_size: u64) -> (Arc<MemoryStorage>, Arc<MemoryEventSink>, DownloadPipeline) {
        let storage = Arc::new(MemoryStorage::new());
        let events = Arc::new(MemoryEventSink::new());
        let env = TaskEnv::new(Arc::new(SignalRegistry::new()), events.clone(), 0);
        let options = DownloadOptions {
            chunk_size,
            ..DownloadOptions::default()
        };
        let pipeline = DownloadPipeline::new(storage.clone(), env, options);
        (storage, events, pipeline)
    }

    #[tokio::test]
    async fn test_download_file_into_memory() {
        let (storage, events, pipeline) = setup(4);
        let file = storage.add_file(storage.root(), "a.bin", (0u8..10).collect::<Vec<_>>());
        let (sink, buffer) = MemorySink::new();

        let written = pipeline
            .download_file(file, Box::new(sink), Some("d1".to_string()))
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(buffer.bytes(), (0u8..10).collect::<Vec<_>>());
        assert_eq!(buffer.status(), BufferStatus::Finished);

        let progress: Vec<u64> = events
            .events_for("d1")
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { transferred, .. } => Some(*transferred),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![4, 8, 10]);
        assert!(matches!(
            events.events_for("d1").last(),
            Some(TransferEvent::Finished { transferred: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_download_failure_aborts_sink() {
        let (storage, events, pipeline) = setup(4);
        let file = storage.add_file(storage.root(), "a.bin", vec![0u8; 10]);
        storage.fail_downloads_of(file.uuid);
        let (sink, buffer) = MemorySink::new();

        let err = pipeline
            .download_file(file, Box::new(sink), Some("d1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SourceRead(_)));
        assert_eq!(buffer.status(), BufferStatus::Aborted);
        assert!(matches!(
            events.events_for("d1").last(),
            Some(TransferEvent::Errored { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_mid_download_frees_handle() {
        let (storage, events, pipeline) = setup(1);
        storage.set_latency(Some(Duration::from_millis(10)));
        let file = storage.add_file(storage.root(), "slow.bin", vec![0u8; 1000]);
        let (sink, buffer) = MemorySink::new();
        let registry = pipeline.env.registry().clone();

        let task = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .download_file(file, Box::new(sink), Some("slow".to_string()))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let old = registry.get("slow").unwrap();
        assert!(registry.cancel("slow"));

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(buffer.status(), BufferStatus::Aborted);
        assert!(!registry.contains("slow"));
        assert!(!registry.acquire("slow").same_as(&old));
        assert!(matches!(
            events.events_for("slow").last(),
            Some(TransferEvent::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_download_directory_to_disk() {
        let (storage, _events, pipeline) = setup(8);
        let docs = storage.add_directory(storage.root(), "docs");
        storage.add_file(docs.uuid, "a.txt", b"0123456789".to_vec());
        let sub = storage.add_directory(docs.uuid, "sub");
        storage.add_file(sub.uuid, "b.txt", vec![7u8; 20]);
        storage.add_directory(docs.uuid, "empty");

        let out = TempDir::new().unwrap();
        let report = pipeline
            .download_directory(docs, ItemScope::owned(), out.path().to_path_buf(), None)
            .await
            .unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.directories, 2);
        assert_eq!(report.bytes, 30);
        let base = out.path().join("docs");
        assert_eq!(std::fs::read(base.join("a.txt")).unwrap(), b"0123456789");
        assert_eq!(std::fs::read(base.join("sub").join("b.txt")).unwrap(), vec![7u8; 20]);
        assert!(base.join("empty").is_dir());
    }

    #[tokio::test]
    async fn test_download_directory_fails_whole() {
        let (storage, events, pipeline) = setup(8);
        let docs = storage.add_directory(storage.root(), "docs");
        let bad = storage.add_file(docs.uuid, "bad.txt", vec![1u8; 10]);
        storage.fail_downloads_of(bad.uuid);

        let out = TempDir::new().unwrap();
        let result = pipeline
            .download_directory(
                docs,
                ItemScope::owned(),
                out.path().to_path_buf(),
                Some("dir".to_string()),
            )
            .await;
        assert!(result.is_err());
        assert!(!out.path().join("docs").join("bad.txt").exists());
        assert!(!out.path().join("docs").join("bad.txt.part").exists());
        assert!(matches!(
            events.events_for("dir").last(),
            Some(TransferEvent::Errored { .. })
        ));
    }
}
