//! 缩略图缓存
//!
//! 查找顺序：内存 → 持久化存储 → 生成。生成路径先拿全局信号量再拿条目锁，
//! 同一条目的并发请求只会触发一次生成，失败不缓存。

use super::generator::{ImageThumbnailer, ThumbnailGenerator};
use super::types::{
    RenderOptions, ThumbnailKind, ThumbnailRequest, ThumbnailSource, ThumbnailStatus,
    THUMBNAIL_VERSION,
};
use crate::cache::KvStore;
use crate::common::KeyedLocks;
use crate::error::{Result, TransferError};
use crate::storage::{ByteRange, StorageApi};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "thumbnail:";

/// 缩略图缓存配置
#[derive(Debug, Clone)]
pub struct ThumbnailCacheOptions {
    /// 同时进行的生成数
    pub max_concurrent: usize,
    /// 生成器版本标记，写进持久化 key
    pub version: String,
    pub render: RenderOptions,
    /// 原始数据上限，超过则不生成
    pub max_source_bytes: u64,
    /// 拉取远端原始数据的分片大小
    pub chunk_size: u64,
}

impl Default for ThumbnailCacheOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            version: THUMBNAIL_VERSION.to_string(),
            render: RenderOptions::default(),
            max_source_bytes: 64 * 1024 * 1024,
            chunk_size: 1024 * 1024,
        }
    }
}

pub struct ThumbnailCache {
    memory: DashMap<Uuid, Bytes>,
    store: Arc<dyn KvStore>,
    storage: Option<Arc<dyn StorageApi>>,
    permits: Arc<Semaphore>,
    item_locks: KeyedLocks<Uuid>,
    generators: DashMap<ThumbnailKind, Arc<dyn ThumbnailGenerator>>,
    options: ThumbnailCacheOptions,
    generated: AtomicUsize,
}

impl ThumbnailCache {
    /// 创建缓存，默认注册图片生成器
    pub fn new(
        store: Arc<dyn KvStore>,
        storage: Option<Arc<dyn StorageApi>>,
        options: ThumbnailCacheOptions,
    ) -> Self {
        let generators: DashMap<ThumbnailKind, Arc<dyn ThumbnailGenerator>> = DashMap::new();
        generators.insert(ThumbnailKind::Image, Arc::new(ImageThumbnailer));

        Self {
            memory: DashMap::new(),
            store,
            storage,
            permits: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
            item_locks: KeyedLocks::new(),
            generators,
            options,
            generated: AtomicUsize::new(0),
        }
    }

    /// 注册（或替换）某类型的生成器
    pub fn register_generator(&self, kind: ThumbnailKind, generator: Arc<dyn ThumbnailGenerator>) {
        self.generators.insert(kind, generator);
    }

    pub fn options(&self) -> &ThumbnailCacheOptions {
        &self.options
    }

    /// 本实例累计生成次数
    pub fn generated_count(&self) -> usize {
        self.generated.load(Ordering::Relaxed)
    }

    /// 获取缩略图
    pub async fn get_thumbnail(&self, request: ThumbnailRequest) -> Result<Bytes> {
        self.fetch(request).await.map(|(bytes, _)| bytes)
    }

    /// 获取缩略图并返回命中情况
    pub async fn fetch(&self, request: ThumbnailRequest) -> Result<(Bytes, ThumbnailStatus)> {
        if let Some(hit) = self.memory.get(&request.item) {
            return Ok((hit.clone(), ThumbnailStatus::CacheHit));
        }

        let cancel = request.cancel.clone();

        // 守卫声明顺序决定释放顺序：条目锁先于信号量释放
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            permit = self.permits.clone().acquire_owned() => permit
                .map_err(|_| TransferError::Cancelled)?,
        };
        let _item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            guard = self.item_locks.lock(request.item) => guard,
        };

        // 等锁期间可能已由其他请求生成
        if let Some(hit) = self.memory.get(&request.item) {
            return Ok((hit.clone(), ThumbnailStatus::CacheHit));
        }

        let key = self.store_key(request.item);
        if let Some(raw) = self.store.get(&key)? {
            let bytes = Bytes::from(raw);
            self.memory.insert(request.item, bytes.clone());
            debug!("缩略图持久化缓存命中: {}", request.item);
            return Ok((bytes, ThumbnailStatus::CacheHit));
        }

        let generator = self
            .generators
            .get(&request.kind)
            .map(|g| g.value().clone())
            .ok_or_else(|| {
                TransferError::Unsupported(format!("没有 {:?} 类型的缩略图生成器", request.kind))
            })?;

        let input = self.load_source(&request).await?;
        let thumbnail = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = generator.generate(input, &self.options.render) => result,
        };
        let thumbnail = match thumbnail {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("缩略图生成失败: item={}, 错误: {}", request.item, e);
                return Err(e);
            }
        };

        self.store.put(&key, &thumbnail)?;
        self.memory.insert(request.item, thumbnail.clone());
        self.generated.fetch_add(1, Ordering::Relaxed);
        debug!(
            "缩略图已生成: item={}, {} bytes",
            request.item,
            thumbnail.len()
        );
        Ok((thumbnail, ThumbnailStatus::Generated))
    }

    /// 移除某条目的缓存（内存 + 当前版本的持久化记录）
    pub fn evict(&self, item: Uuid) -> Result<bool> {
        let in_memory = self.memory.remove(&item).is_some();
        let persisted = self.store.remove(&self.store_key(item))?;
        Ok(in_memory || persisted)
    }

    /// 清空内存层，持久化层保留
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// 删除其他版本生成的持久化记录，返回删除条数
    pub fn purge_stale_versions(&self) -> Result<usize> {
        let suffix = format!(":{}", self.options.version);
        let mut removed = 0;
        for key in self.store.keys()? {
            if key.starts_with(KEY_PREFIX) && !key.ends_with(&suffix) && self.store.remove(&key)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("已清理 {} 条旧版本缩略图", removed);
        }
        Ok(removed)
    }

    fn store_key(&self, item: Uuid) -> String {
        format!("{}{}:{}", KEY_PREFIX, item, self.options.version)
    }

    async fn load_source(&self, request: &ThumbnailRequest) -> Result<Bytes> {
        match &request.source {
            ThumbnailSource::Bytes(bytes) => {
                self.check_source_size(bytes.len() as u64)?;
                Ok(bytes.clone())
            }
            ThumbnailSource::Local(path) => {
                let size = tokio::fs::metadata(path)
                    .await
                    .map_err(TransferError::from_io_read)?
                    .len();
                self.check_source_size(size)?;
                let data = tokio::fs::read(path)
                    .await
                    .map_err(TransferError::from_io_read)?;
                Ok(Bytes::from(data))
            }
            ThumbnailSource::Remote(file) => {
                self.check_source_size(file.size)?;
                let storage = self.storage.as_ref().ok_or_else(|| {
                    TransferError::Unsupported("未配置存储接口，无法读取远端文件".to_string())
                })?;
                let mut buf = BytesMut::with_capacity(file.size as usize);
                for range in ByteRange::split(file.size, self.options.chunk_size) {
                    let chunk = storage.download_chunk(file, range, &request.cancel).await?;
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }

    fn check_source_size(&self, size: u64) -> Result<()> {
        if size > self.options.max_source_bytes {
            return Err(TransferError::Unsupported(format!(
                "原始文件过大 ({} bytes)，不生成缩略图",
                size
            )));
        }
        Ok(())
    }
}
