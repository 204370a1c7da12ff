//! 上传流水线
//!
//! - 单文件：开会话 → 分片上传（每片推进进度）→ 提交；图片上传成功后后台预生成缩略图
//! - 文件夹：浅层优先建远端目录（记忆化）→ 有界并发上传文件 → 汇总为一个任务的进度
//!
//! 文件夹中单个文件失败不会中止其它文件，最终按 `FailurePolicy` 决定任务结局

use super::naming::directory_display_name;
use super::source::UploadSource;
use crate::common::{format_bytes, spawn_detached};
use crate::error::{ConstituentFailure, Result, TransferError};
use crate::signal::SignalHandle;
use crate::storage::{ChunkMeta, RemoteFile, StorageApi};
use crate::task::{TargetKind, TaskEnv, TaskKind, TaskSpec, TaskTracker};
use crate::thumbnail::{ThumbnailCache, ThumbnailRequest};
use crate::tree::{scan_local_directory, RelativePath, ScanOptions};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 上传参数
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 文件夹上传时的并发文件数
    pub max_concurrent_files: usize,
    /// 图片上传成功后预生成缩略图
    pub pregenerate_thumbnails: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_concurrent_files: 4,
            pregenerate_thumbnails: true,
        }
    }
}

/// 多文件任务的失败策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 任一子项失败则任务失败
    #[default]
    FailWhole,
    /// 允许部分成功，失败项随完成事件一起报告
    AllowPartial,
}

/// 单文件上传请求
#[derive(Debug)]
pub struct UploadRequest {
    pub source: UploadSource,
    /// 目标目录
    pub parent: Uuid,
    /// 远端文件名，None 时取本地文件名
    pub name: Option<String>,
    pub mime: Option<String>,
    pub task_id: Option<String>,
}

impl UploadRequest {
    pub fn new(source: UploadSource, parent: Uuid) -> Self {
        Self {
            source,
            parent,
            name: None,
            mime: None,
            task_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_task_id(mut self, task_id: Option<String>) -> Self {
        self.task_id = task_id;
        self
    }
}

/// 文件夹上传中的一个文件
#[derive(Debug)]
pub struct DirectoryUploadFile {
    /// 相对于目标目录的路径（含文件名）
    pub relative_path: RelativePath,
    pub source: UploadSource,
}

/// 文件夹上传请求
#[derive(Debug)]
pub struct DirectoryUploadRequest {
    pub parent: Uuid,
    pub files: Vec<DirectoryUploadFile>,
    /// 额外需要创建的目录（空目录）
    pub directories: Vec<RelativePath>,
    pub policy: FailurePolicy,
    pub task_id: Option<String>,
}

/// 文件夹上传结果
#[derive(Debug, Clone, Default)]
pub struct DirectoryUploadReport {
    /// 任务显示名
    pub name: String,
    pub uploaded: Vec<RemoteFile>,
    pub directories_created: usize,
    pub failures: Vec<ConstituentFailure>,
    pub bytes: u64,
}

impl DirectoryUploadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 上传流水线
#[derive(Clone)]
pub struct UploadPipeline {
    storage: Arc<dyn StorageApi>,
    env: TaskEnv,
    options: UploadOptions,
    thumbnails: Option<Arc<ThumbnailCache>>,
}

impl UploadPipeline {
    pub fn new(storage: Arc<dyn StorageApi>, env: TaskEnv, options: UploadOptions) -> Self {
        Self {
            storage,
            env,
            options,
            thumbnails: None,
        }
    }

    /// 挂上缩略图缓存，图片上传后预生成
    pub fn with_thumbnails(mut self, thumbnails: Arc<ThumbnailCache>) -> Self {
        self.thumbnails = Some(thumbnails);
        self
    }

    /// 上传单个文件
    pub async fn upload_file(&self, request: UploadRequest) -> Result<RemoteFile> {
        let UploadRequest {
            source,
            parent,
            name,
            mime,
            task_id,
        } = request;
        let name = name
            .or_else(|| source.default_name())
            .ok_or_else(|| TransferError::InvalidInput("上传内存数据必须指定文件名".to_string()))?;

        let run = self
            .env
            .begin(TaskSpec::new(TaskKind::Upload, TargetKind::File, name.clone()).with_id(task_id));

        let result = async {
            let size = source.size().await?;
            run.start(size);
            upload_stream(
                self.storage.clone(),
                source,
                parent,
                name,
                mime,
                self.options.chunk_size,
                run.signal().clone(),
                run.tracker().clone(),
            )
            .await
        }
        .await;

        if let Ok(file) = &result {
            self.pregenerate_thumbnail(file);
        }
        run.complete(&result);
        result
    }

    /// 上传一组文件（保留目录结构）
    pub async fn upload_directory(
        &self,
        request: DirectoryUploadRequest,
    ) -> Result<DirectoryUploadReport> {
        let name = directory_display_name(request.files.iter().map(|f| &f.relative_path));
        let run = self.env.begin(
            TaskSpec::new(TaskKind::Upload, TargetKind::Directory, name.clone())
                .with_id(request.task_id.clone()),
        );
        let policy = request.policy;

        let result = match self
            .upload_directory_inner(request, name, run.signal(), run.tracker())
            .await
        {
            Ok(report) if !report.is_complete() && policy == FailurePolicy::FailWhole => {
                Err(TransferError::PartialFailure {
                    failed: report.failures.len(),
                    succeeded: report.uploaded.len(),
                    failures: report.failures,
                })
            }
            other => other,
        };

        let partial_failures = match &result {
            Ok(report) if !report.is_complete() => {
                warn!(
                    "文件夹上传部分失败: {} ({} 个成功, {} 个失败)",
                    report.name,
                    report.uploaded.len(),
                    report.failures.len()
                );
                report.failures.clone()
            }
            _ => Vec::new(),
        };
        run.complete_with(&result, partial_failures);
        result
    }

    async fn upload_directory_inner(
        &self,
        request: DirectoryUploadRequest,
        name: String,
        signal: &SignalHandle,
        tracker: &Arc<TaskTracker>,
    ) -> Result<DirectoryUploadReport> {
        let mut total = 0u64;
        for file in &request.files {
            total += file.source.size().await?;
        }
        tracker.start(total);

        // 需要的目录：显式目录 + 所有文件的祖先目录，浅层优先
        let mut needed: BTreeSet<(usize, RelativePath)> = BTreeSet::new();
        let ancestors = request
            .files
            .iter()
            .filter_map(|f| f.relative_path.parent())
            .chain(request.directories.iter().cloned());
        for mut dir in ancestors {
            while !dir.is_root() {
                needed.insert((dir.depth(), dir.clone()));
                dir = match dir.parent() {
                    Some(parent) => parent,
                    None => break,
                };
            }
        }

        let mut remote_dirs: HashMap<RelativePath, Uuid> = HashMap::new();
        remote_dirs.insert(RelativePath::root(), request.parent);
        for (_, dir) in &needed {
            signal.checkpoint().await?;
            let parent = dir
                .parent()
                .and_then(|p| remote_dirs.get(&p).copied())
                .ok_or_else(|| TransferError::Storage(format!("父目录未创建: {}", dir)))?;
            let dir_name = dir.file_name().unwrap_or_default();
            let created = self.storage.create_directory(parent, dir_name).await?;
            debug!("已创建远端目录: {} -> {}", dir, created.uuid);
            remote_dirs.insert(dir.clone(), created.uuid);
        }

        info!(
            "开始上传文件夹: {} ({} 个文件, {} 个目录, {})",
            name,
            request.files.len(),
            needed.len(),
            format_bytes(total)
        );

        let permits = Arc::new(Semaphore::new(self.options.max_concurrent_files.max(1)));
        let mut join_set = JoinSet::new();
        for file in request.files {
            let path = file.relative_path;
            let parent = path
                .parent()
                .and_then(|p| remote_dirs.get(&p).copied())
                .ok_or_else(|| TransferError::Storage(format!("父目录未创建: {}", path)))?;
            let file_name = path.file_name().unwrap_or_default().to_string();
            let storage = self.storage.clone();
            let signal = signal.clone();
            let tracker = tracker.clone();
            let permits = permits.clone();
            let chunk_size = self.options.chunk_size;
            let source = file.source;

            join_set.spawn(async move {
                let result = async {
                    let _permit = tokio::select! {
                        _ = signal.cancel_token().cancelled() => return Err(TransferError::Cancelled),
                        permit = permits.acquire_owned() => permit
                            .map_err(|_| TransferError::Storage("上传许可已关闭".to_string()))?,
                    };
                    upload_stream(
                        storage, source, parent, file_name, None, chunk_size, signal, tracker,
                    )
                    .await
                }
                .await;
                (path, result)
            });
        }

        let mut report = DirectoryUploadReport {
            name,
            directories_created: needed.len(),
            ..Default::default()
        };
        let mut cancelled = false;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(file))) => {
                    report.bytes += file.size;
                    self.pregenerate_thumbnail(&file);
                    report.uploaded.push(file);
                }
                Ok((_, Err(TransferError::Cancelled))) => cancelled = true,
                Ok((path, Err(e))) => {
                    warn!("文件上传失败: {}, 错误: {}", path, e);
                    report.failures.push(ConstituentFailure {
                        path: path.to_string(),
                        error: e.to_string(),
                    });
                }
                Err(join_err) => {
                    warn!("上传子任务异常退出: {}", join_err);
                    report.failures.push(ConstituentFailure {
                        path: String::new(),
                        error: join_err.to_string(),
                    });
                }
            }
        }

        if cancelled || signal.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(report)
    }

    /// 扫描本地文件夹并整体上传到 `parent/<文件夹名>`
    pub async fn upload_local_directory(
        &self,
        root: PathBuf,
        parent: Uuid,
        policy: FailurePolicy,
        task_id: Option<String>,
    ) -> Result<DirectoryUploadReport> {
        let folder_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidInput(format!("无效的文件夹路径: {:?}", root)))?;

        let scan_root = root.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            scan_local_directory(&scan_root, &ScanOptions::default())
        })
        .await
        .map_err(|e| TransferError::SourceRead(e.to_string()))?
        .map_err(|e| TransferError::SourceRead(format!("{:#}", e)))?;

        let base = RelativePath::root().join(&folder_name);
        let mut files = Vec::new();
        let mut directories = vec![base.clone()];
        for entry in scanned {
            let relative_path = base.concat(&entry.relative_path);
            if entry.is_dir {
                directories.push(relative_path);
            } else {
                files.push(DirectoryUploadFile {
                    relative_path,
                    source: UploadSource::Local(entry.local_path),
                });
            }
        }

        self.upload_directory(DirectoryUploadRequest {
            parent,
            files,
            directories,
            policy,
            task_id,
        })
        .await
    }

    fn pregenerate_thumbnail(&self, file: &RemoteFile) {
        if !self.options.pregenerate_thumbnails || !file.is_image() {
            return;
        }
        let Some(thumbnails) = self.thumbnails.clone() else {
            return;
        };
        let request = ThumbnailRequest::remote(file.clone());
        spawn_detached(format!("缩略图预生成 {}", file.name), async move {
            thumbnails.get_thumbnail(request).await
        });
    }
}

/// 分片上传一个源并提交
#[allow(clippy::too_many_arguments)]
async fn upload_stream(
    storage: Arc<dyn StorageApi>,
    source: UploadSource,
    parent: Uuid,
    name: String,
    mime: Option<String>,
    chunk_size: u64,
    signal: SignalHandle,
    tracker: Arc<TaskTracker>,
) -> Result<RemoteFile> {
    let mut opened = source.open().await?;
    let size = opened.size;
    let session = storage
        .begin_upload(parent, &name, size, mime.as_deref())
        .await?;

    let mut offset = 0u64;
    let mut index = 0u64;
    loop {
        signal.checkpoint().await?;
        let chunk = opened.read_chunk(chunk_size.max(1) as usize).await?;
        if chunk.is_empty() {
            break;
        }
        let len = chunk.len() as u64;
        let meta = ChunkMeta {
            upload_key: session.upload_key.clone(),
            index,
            offset,
        };
        let cancel = signal.cancel_token();
        tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            ack = storage.upload_chunk(&meta, chunk, cancel) => ack?,
        }
        offset += len;
        index += 1;
        tracker.advance(len);
    }

    if offset != size {
        return Err(TransferError::SourceRead(format!(
            "源大小发生变化: {} 期望 {} 实际 {}",
            name, size, offset
        )));
    }
    storage.finish_upload(&session).await
}
