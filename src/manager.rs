//! 传输管理器
//!
//! 对外的统一入口：持有各流水线、共享的信号注册表和缓存，
//! 每个操作在后台任务里运行并立即返回任务 ID。

use crate::archive::{ArchiveBuilder, ArchiveSummary};
use crate::cache::{Cached, KvStore, MemoryKvStore, MetadataCache, SqliteKvStore};
use crate::config::{AppConfig, CacheBackend};
use crate::download::{DirectoryDownloadReport, DownloadPipeline, FileSink, TransferSink};
use crate::error::{Result, TransferError};
use crate::events::EventSink;
use crate::signal::SignalRegistry;
use crate::storage::{DirectorySize, ItemScope, RemoteDirectory, RemoteFile, RemoteItem, StorageApi};
use crate::task::{TaskEnv, TransferTask};
use crate::thumbnail::{ThumbnailCache, ThumbnailRequest};
use crate::upload::{
    DirectoryUploadReport, DirectoryUploadRequest, FailurePolicy, UploadPipeline, UploadRequest,
};
use anyhow::Context;
use bytes::Bytes;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// 后台任务句柄
pub struct TaskHandle<T> {
    task_id: String,
    join: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 等待任务结束
    pub async fn join(self) -> Result<T> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TransferError::Cancelled),
            Err(e) => Err(TransferError::Storage(format!("任务异常退出: {}", e))),
        }
    }
}

/// 传输管理器
///
/// 任务快照和缩略图内存层不会自动回收：终态任务一直保留到 `clear_finished`，
/// 缩略图内存层一直保留到 `thumbnails().clear_memory()` 或 `evict`。
/// 长时间运行的宿主需要定期调用它们。
pub struct TransferManager {
    env: TaskEnv,
    uploads: UploadPipeline,
    downloads: DownloadPipeline,
    archives: ArchiveBuilder,
    thumbnails: Arc<ThumbnailCache>,
    metadata: Arc<MetadataCache>,
    default_policy: FailurePolicy,
}

impl TransferManager {
    /// 使用给定的缓存存储创建
    pub fn new(
        storage: Arc<dyn StorageApi>,
        store: Arc<dyn KvStore>,
        events: Arc<dyn EventSink>,
        config: &AppConfig,
    ) -> Self {
        let registry = Arc::new(SignalRegistry::new());
        let env = TaskEnv::new(registry, events, config.transfer.progress_throttle_ms);

        let thumbnails = Arc::new(ThumbnailCache::new(
            store.clone(),
            Some(storage.clone()),
            config.thumbnail_options(),
        ));
        let metadata = Arc::new(MetadataCache::new(
            storage.clone(),
            store,
            config.recompute_window(),
        ));

        Self {
            uploads: UploadPipeline::new(storage.clone(), env.clone(), config.upload_options())
                .with_thumbnails(thumbnails.clone()),
            downloads: DownloadPipeline::new(storage.clone(), env.clone(), config.download_options()),
            archives: ArchiveBuilder::new(storage, env.clone(), config.archive_options()),
            env,
            thumbnails,
            metadata,
            default_policy: config.transfer.failure_policy,
        }
    }

    /// 按配置打开持久化缓存后创建
    pub fn from_config(
        storage: Arc<dyn StorageApi>,
        events: Arc<dyn EventSink>,
        config: &AppConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let store: Arc<dyn KvStore> = match config.cache.backend {
            CacheBackend::Sqlite => Arc::new(
                SqliteKvStore::open(&config.cache.db_path)
                    .with_context(|| format!("打开缓存数据库失败: {:?}", config.cache.db_path))?,
            ),
            CacheBackend::Memory => Arc::new(MemoryKvStore::new()),
        };
        let manager = Self::new(storage, store, events, config);
        if let Err(e) = manager.thumbnails.purge_stale_versions() {
            warn!("清理旧版本缩略图失败: {}", e);
        }
        info!("传输管理器已创建: 缓存后端={:?}", config.cache.backend);
        Ok(manager)
    }

    fn spawn<T, F>(&self, task_id: String, fut: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        // 先登记句柄，spawn 之后立即取消也能生效
        let registry = self.env.registry().clone();
        let handle = registry.acquire(&task_id);
        let join = tokio::spawn(async move {
            let result = fut.await;
            // 任务没走到登记阶段就结束时（例如参数校验失败）由这里释放
            registry.release_handle(&handle);
            result
        });
        TaskHandle { task_id, join }
    }

    fn new_task_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn upload_file(&self, request: UploadRequest) -> TaskHandle<RemoteFile> {
        let task_id = request.task_id.clone().unwrap_or_else(Self::new_task_id);
        let request = request.with_task_id(Some(task_id.clone()));
        let uploads = self.uploads.clone();
        self.spawn(task_id, async move { uploads.upload_file(request).await })
    }

    pub fn upload_directory(
        &self,
        mut request: DirectoryUploadRequest,
    ) -> TaskHandle<DirectoryUploadReport> {
        let task_id = request.task_id.clone().unwrap_or_else(Self::new_task_id);
        request.task_id = Some(task_id.clone());
        let uploads = self.uploads.clone();
        self.spawn(task_id, async move { uploads.upload_directory(request).await })
    }

    /// 上传本地文件夹；`policy` 为空时使用配置的默认策略
    pub fn upload_local_directory(
        &self,
        root: PathBuf,
        parent: Uuid,
        policy: Option<FailurePolicy>,
    ) -> TaskHandle<DirectoryUploadReport> {
        let task_id = Self::new_task_id();
        let policy = policy.unwrap_or(self.default_policy);
        let uploads = self.uploads.clone();
        let id = task_id.clone();
        self.spawn(task_id, async move {
            uploads
                .upload_local_directory(root, parent, policy, Some(id))
                .await
        })
    }

    pub fn download_file(&self, file: RemoteFile, sink: Box<dyn TransferSink>) -> TaskHandle<u64> {
        let task_id = Self::new_task_id();
        let downloads = self.downloads.clone();
        let id = task_id.clone();
        self.spawn(task_id, async move {
            downloads.download_file(file, sink, Some(id)).await
        })
    }

    /// 下载到本地路径（经由 `.part` 临时文件）
    pub fn download_file_to(&self, file: RemoteFile, target: PathBuf) -> TaskHandle<u64> {
        let task_id = Self::new_task_id();
        let downloads = self.downloads.clone();
        let id = task_id.clone();
        self.spawn(task_id, async move {
            let sink = FileSink::create(&target).await?;
            downloads.download_file(file, Box::new(sink), Some(id)).await
        })
    }

    pub fn download_directory(
        &self,
        dir: RemoteDirectory,
        scope: ItemScope,
        local_root: PathBuf,
    ) -> TaskHandle<DirectoryDownloadReport> {
        let task_id = Self::new_task_id();
        let downloads = self.downloads.clone();
        let id = task_id.clone();
        self.spawn(task_id, async move {
            downloads
                .download_directory(dir, scope, local_root, Some(id))
                .await
        })
    }

    /// 打包下载
    pub fn build_archive(
        &self,
        items: Vec<RemoteItem>,
        scope: ItemScope,
        sink: Box<dyn TransferSink>,
        root_name: &str,
    ) -> TaskHandle<ArchiveSummary> {
        let task_id = Self::new_task_id();
        let archives = self.archives.clone();
        let root_name = root_name.to_string();
        let id = task_id.clone();
        self.spawn(task_id, async move {
            archives
                .build_archive(items, scope, sink, &root_name, Some(id))
                .await
        })
    }

    /// 暂停任务，返回状态是否发生变化
    pub fn pause(&self, task_id: &str) -> bool {
        let changed = self.env.registry().pause(task_id);
        if changed {
            if let Some(tracker) = self.env.tracker(task_id) {
                tracker.mark_paused();
            }
        }
        changed
    }

    pub fn resume(&self, task_id: &str) -> bool {
        let changed = self.env.registry().resume(task_id);
        if changed {
            if let Some(tracker) = self.env.tracker(task_id) {
                tracker.mark_resumed();
            }
        }
        changed
    }

    /// 取消任务；未知或已结束的任务返回 false
    pub fn cancel(&self, task_id: &str) -> bool {
        self.env.registry().cancel(task_id)
    }

    /// 所有任务快照（按创建时间）
    pub fn tasks(&self) -> Vec<TransferTask> {
        self.env.snapshots()
    }

    pub fn task(&self, task_id: &str) -> Option<TransferTask> {
        self.env.tracker(task_id).map(|t| t.snapshot())
    }

    /// 丢弃终态任务的快照，运行中的任务不受影响
    pub fn clear_finished(&self) -> usize {
        self.env.clear_finished()
    }

    /// 文件夹大小（限流重算）
    pub async fn directory_size(
        &self,
        uuid: Uuid,
        scope: &ItemScope,
    ) -> Result<Cached<DirectorySize>> {
        self.metadata.directory_size(uuid, scope).await
    }

    pub async fn item_name(&self, uuid: Uuid) -> Result<String> {
        self.metadata.item_name(uuid).await
    }

    pub async fn get_thumbnail(&self, request: ThumbnailRequest) -> Result<Bytes> {
        self.thumbnails.get_thumbnail(request).await
    }

    pub fn thumbnails(&self) -> &Arc<ThumbnailCache> {
        &self.thumbnails
    }

    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        self.env.registry()
    }

    /// 取消所有运行中的任务
    pub fn shutdown(&self) {
        info!("传输管理器关闭中");
        self.env.registry().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::MemorySink;
    use crate::events::{MemoryEventSink, TransferEvent};
    use crate::storage::MemoryStorage;
    use crate::task::TaskState;
    use crate::upload::UploadSource;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryStorage>, Arc<MemoryEventSink>, TransferManager) {
        let storage = Arc::new(MemoryStorage::new());
        let events = Arc::new(MemoryEventSink::new());
        let mut config = AppConfig::default();
        config.transfer.progress_throttle_ms = 0;
        config.transfer.chunk_size = 4;
        config.archive.chunk_size = 4;
        let manager = TransferManager::new(
            storage.clone(),
            Arc::new(MemoryKvStore::new()),
            events.clone(),
            &config,
        );
        (storage, events, manager)
    }

    #[tokio::test]
    async fn test_upload_then_download_through_manager() {
        let (storage, _events, manager) = setup();
        let handle = manager.upload_file(
            UploadRequest::new(UploadSource::Bytes(Bytes::from_static(b"hello world")), storage.root())
                .with_name("h.txt"),
        );
        let upload_id = handle.task_id().to_string();
        let file = handle.join().await.unwrap();

        let (sink, buffer) = MemorySink::new();
        let written = manager.download_file(file, Box::new(sink)).join().await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(buffer.bytes(), b"hello world");

        let snapshot = manager.task(&upload_id).unwrap();
        assert_eq!(snapshot.state, TaskState::Finished);
        assert_eq!(manager.tasks().len(), 2);
        assert_eq!(manager.clear_finished(), 2);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_right_after_spawn() {
        let (storage, events, manager) = setup();
        let file = storage.add_file(storage.root(), "big.bin", vec![0u8; 4096]);
        let (sink, _buffer) = MemorySink::new();

        let handle = manager.download_file(file, Box::new(sink));
        let id = handle.task_id().to_string();
        assert!(manager.cancel(&id));

        assert!(handle.join().await.unwrap_err().is_cancelled());
        assert!(matches!(
            events.events_for(&id).last(),
            Some(TransferEvent::Cancelled { .. })
        ));
        assert!(!manager.cancel(&id));
    }

    #[tokio::test]
    async fn test_pause_and_resume_emit_events() {
        let (storage, events, manager) = setup();
        storage.set_latency(Some(Duration::from_millis(5)));
        let file = storage.add_file(storage.root(), "slow.bin", vec![0u8; 64]);
        let (sink, buffer) = MemorySink::new();

        let handle = manager.download_file(file, Box::new(sink));
        let id = handle.task_id().to_string();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(manager.pause(&id));
        assert!(!manager.pause(&id));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let paused_at = buffer.len();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(buffer.len(), paused_at);

        assert!(manager.resume(&id));
        assert_eq!(handle.join().await.unwrap(), 64);

        let log = events.events_for(&id);
        assert!(log.iter().any(|e| matches!(e, TransferEvent::Paused { .. })));
        assert!(log.iter().any(|e| matches!(e, TransferEvent::Resumed { .. })));
        assert!(matches!(log.last(), Some(TransferEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn test_rejected_request_releases_handle() {
        let (storage, _events, manager) = setup();
        let handle = manager.upload_file(UploadRequest::new(
            UploadSource::Bytes(Bytes::from_static(b"x")),
            storage.root(),
        ));
        assert!(matches!(
            handle.join().await,
            Err(TransferError::InvalidInput(_))
        ));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_directory_size_and_name_lookup() {
        let (storage, _events, manager) = setup();
        let docs = storage.add_directory(storage.root(), "docs");
        storage.add_file(docs.uuid, "a.txt", vec![0u8; 10]);

        let size = manager
            .directory_size(docs.uuid, &ItemScope::owned())
            .await
            .unwrap();
        assert_eq!(size.value.size, 10);
        assert!(size.is_fresh());
        assert_eq!(manager.item_name(docs.uuid).await.unwrap(), "docs");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_tasks() {
        let (storage, _events, manager) = setup();
        storage.set_latency(Some(Duration::from_millis(10)));
        let file = storage.add_file(storage.root(), "slow.bin", vec![0u8; 1024]);
        let (sink, _buffer) = MemorySink::new();

        let handle = manager.download_file(file, Box::new(sink));
        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.shutdown();

        assert!(handle.join().await.unwrap_err().is_cancelled());
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_pruning_keeps_running_tasks_and_persisted_thumbnails() {
        let (storage, _events, manager) = setup();
        manager
            .upload_file(
                UploadRequest::new(UploadSource::Bytes(Bytes::from_static(b"done")), storage.root())
                    .with_name("done.txt"),
            )
            .join()
            .await
            .unwrap();

        storage.set_latency(Some(Duration::from_millis(10)));
        let file = storage.add_file(storage.root(), "slow.bin", vec![0u8; 1024]);
        let (sink, _buffer) = MemorySink::new();
        let running = manager.download_file(file, Box::new(sink));
        let running_id = running.task_id().to_string();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.clear_finished(), 1);
        let remaining: Vec<_> = manager.tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(remaining, vec![running_id.clone()]);

        let png = crate::thumbnail::generator::tests::sample_png(32, 32);
        let item = Uuid::new_v4();
        let thumb = || {
            ThumbnailRequest::new(
                item,
                crate::thumbnail::ThumbnailKind::Image,
                crate::thumbnail::ThumbnailSource::Bytes(Bytes::from(png.clone())),
            )
        };
        let first = manager.get_thumbnail(thumb()).await.unwrap();
        assert_eq!(manager.thumbnails().memory_len(), 1);
        manager.thumbnails().clear_memory();
        assert_eq!(manager.thumbnails().memory_len(), 0);
        assert_eq!(manager.get_thumbnail(thumb()).await.unwrap(), first);
        assert_eq!(manager.thumbnails().generated_count(), 1);

        assert!(manager.cancel(&running_id));
        assert!(running.join().await.unwrap_err().is_cancelled());
        assert_eq!(manager.clear_finished(), 1);
        assert!(manager.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_with_sqlite_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.cache.db_path = dir.path().join("cache.db");
        let storage = Arc::new(MemoryStorage::new());
        let photos = storage.add_directory(storage.root(), "photos");
        let manager = TransferManager::from_config(
            storage.clone(),
            Arc::new(MemoryEventSink::new()),
            &config,
        )
        .unwrap();
        assert_eq!(manager.item_name(photos.uuid).await.unwrap(), "photos");
        assert!(config.cache.db_path.exists());
    }
}
