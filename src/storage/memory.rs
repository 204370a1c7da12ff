//! 进程内存储实现
//!
//! 用于测试和本地演示；支持注入读写失败和分片延迟

use super::api::StorageApi;
use super::types::{
    ByteRange, ChunkMeta, DirectoryListing, DirectorySize, ItemScope, RemoteDirectory, RemoteFile,
    UploadSession,
};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct StoredFile {
    meta: RemoteFile,
    data: Bytes,
}

struct PendingUpload {
    session: UploadSession,
    chunks: BTreeMap<u64, Bytes>,
}

#[derive(Default)]
struct State {
    directories: HashMap<Uuid, RemoteDirectory>,
    files: HashMap<Uuid, StoredFile>,
    sessions: HashMap<String, PendingUpload>,
    failing_downloads: HashSet<Uuid>,
    failing_uploads: HashSet<String>,
    failing_listings: HashSet<Uuid>,
}

/// 内存存储
pub struct MemoryStorage {
    root: Uuid,
    state: Mutex<State>,
    latency: Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
    size_calls: AtomicUsize,
    created_directories: AtomicUsize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let root = Uuid::new_v4();
        let mut state = State::default();
        state.directories.insert(
            root,
            RemoteDirectory {
                uuid: root,
                parent: None,
                name: String::new(),
            },
        );
        Self {
            root,
            state: Mutex::new(state),
            latency: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            size_calls: AtomicUsize::new(0),
            created_directories: AtomicUsize::new(0),
        }
    }

    /// 根目录
    pub fn root(&self) -> Uuid {
        self.root
    }

    /// 直接添加目录（不计入 `created_directories`）
    pub fn add_directory(&self, parent: Uuid, name: &str) -> RemoteDirectory {
        let dir = RemoteDirectory {
            uuid: Uuid::new_v4(),
            parent: Some(parent),
            name: name.to_string(),
        };
        self.state.lock().directories.insert(dir.uuid, dir.clone());
        dir
    }

    /// 直接添加文件
    pub fn add_file(&self, parent: Uuid, name: &str, data: impl Into<Bytes>) -> RemoteFile {
        let data = data.into();
        let meta = RemoteFile {
            uuid: Uuid::new_v4(),
            parent,
            name: name.to_string(),
            size: data.len() as u64,
            mime: None,
        };
        self.state.lock().files.insert(
            meta.uuid,
            StoredFile {
                meta: meta.clone(),
                data,
            },
        );
        meta
    }

    pub fn file_content(&self, uuid: Uuid) -> Option<Bytes> {
        self.state.lock().files.get(&uuid).map(|f| f.data.clone())
    }

    pub fn find_file(&self, parent: Uuid, name: &str) -> Option<RemoteFile> {
        self.state
            .lock()
            .files
            .values()
            .find(|f| f.meta.parent == parent && f.meta.name == name)
            .map(|f| f.meta.clone())
    }

    pub fn find_directory(&self, parent: Uuid, name: &str) -> Option<RemoteDirectory> {
        self.state
            .lock()
            .directories
            .values()
            .find(|d| d.parent == Some(parent) && d.name == name)
            .cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    /// 通过 API 创建的目录数
    pub fn created_directories(&self) -> usize {
        self.created_directories.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn size_calls(&self) -> usize {
        self.size_calls.load(Ordering::SeqCst)
    }

    /// 每个分片读写前的模拟延迟
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn fail_downloads_of(&self, uuid: Uuid) {
        self.state.lock().failing_downloads.insert(uuid);
    }

    /// 名称匹配的文件上传分片时失败
    pub fn fail_uploads_named(&self, name: &str) {
        self.state.lock().failing_uploads.insert(name.to_string());
    }

    pub fn fail_listing_of(&self, dir: Uuid) {
        self.state.lock().failing_listings.insert(dir);
    }

    /// 直接修改文件内容（模拟他处写入，用于观察缓存是否刷新）
    pub fn replace_content(&self, uuid: Uuid, data: impl Into<Bytes>) {
        let data = data.into();
        if let Some(file) = self.state.lock().files.get_mut(&uuid) {
            file.meta.size = data.len() as u64;
            file.data = data;
        }
    }

    async fn simulate_latency(&self, cancel: &CancellationToken) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }

    fn size_of(state: &State, dir: Uuid) -> DirectorySize {
        let mut total = DirectorySize::default();
        for file in state.files.values().filter(|f| f.meta.parent == dir) {
            total.size += file.meta.size;
            total.files += 1;
        }
        for sub in state.directories.values().filter(|d| d.parent == Some(dir)) {
            let nested = Self::size_of(state, sub.uuid);
            total.size += nested.size;
            total.files += nested.files;
            total.folders += nested.folders + 1;
        }
        total
    }
}

#[async_trait]
impl StorageApi for MemoryStorage {
    async fn begin_upload(
        &self,
        parent: Uuid,
        name: &str,
        size: u64,
        mime: Option<&str>,
    ) -> Result<UploadSession> {
        let mut state = self.state.lock();
        if !state.directories.contains_key(&parent) {
            return Err(TransferError::Storage(format!("目录不存在: {}", parent)));
        }
        let session = UploadSession {
            upload_key: Uuid::new_v4().simple().to_string(),
            uuid: Uuid::new_v4(),
            parent,
            name: name.to_string(),
            size,
            mime: mime.map(str::to_string),
        };
        state.sessions.insert(
            session.upload_key.clone(),
            PendingUpload {
                session: session.clone(),
                chunks: BTreeMap::new(),
            },
        );
        Ok(session)
    }

    async fn upload_chunk(
        &self,
        meta: &ChunkMeta,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.simulate_latency(cancel).await?;
        let mut state = self.state.lock();
        let State {
            sessions,
            failing_uploads,
            ..
        } = &mut *state;
        let pending = sessions
            .get_mut(&meta.upload_key)
            .ok_or_else(|| TransferError::Storage(format!("上传会话不存在: {}", meta.upload_key)))?;
        if failing_uploads.contains(&pending.session.name) {
            return Err(TransferError::Storage(format!(
                "分片 {} 上传失败: {}",
                meta.index, pending.session.name
            )));
        }
        pending.chunks.insert(meta.offset, data);
        Ok(())
    }

    async fn finish_upload(&self, session: &UploadSession) -> Result<RemoteFile> {
        let mut state = self.state.lock();
        let pending = state
            .sessions
            .remove(&session.upload_key)
            .ok_or_else(|| TransferError::Storage(format!("上传会话不存在: {}", session.upload_key)))?;

        let mut data = BytesMut::with_capacity(session.size as usize);
        for chunk in pending.chunks.values() {
            data.extend_from_slice(chunk);
        }
        if data.len() as u64 != session.size {
            return Err(TransferError::Storage(format!(
                "上传大小不符: 期望 {} 实际 {}",
                session.size,
                data.len()
            )));
        }

        let meta = RemoteFile {
            uuid: session.uuid,
            parent: session.parent,
            name: session.name.clone(),
            size: session.size,
            mime: session.mime.clone(),
        };
        state.files.insert(
            meta.uuid,
            StoredFile {
                meta: meta.clone(),
                data: data.freeze(),
            },
        );
        Ok(meta)
    }

    async fn create_directory(&self, parent: Uuid, name: &str) -> Result<RemoteDirectory> {
        let mut state = self.state.lock();
        if !state.directories.contains_key(&parent) {
            return Err(TransferError::Storage(format!("目录不存在: {}", parent)));
        }
        if let Some(existing) = state
            .directories
            .values()
            .find(|d| d.parent == Some(parent) && d.name == name)
        {
            return Ok(existing.clone());
        }
        let dir = RemoteDirectory {
            uuid: Uuid::new_v4(),
            parent: Some(parent),
            name: name.to_string(),
        };
        state.directories.insert(dir.uuid, dir.clone());
        self.created_directories.fetch_add(1, Ordering::SeqCst);
        Ok(dir)
    }

    async fn download_chunk(
        &self,
        file: &RemoteFile,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.simulate_latency(cancel).await?;
        let state = self.state.lock();
        if state.failing_downloads.contains(&file.uuid) {
            return Err(TransferError::SourceRead(format!("读取失败: {}", file.name)));
        }
        let stored = state
            .files
            .get(&file.uuid)
            .ok_or_else(|| TransferError::SourceRead(format!("文件不存在: {}", file.name)))?;
        let len = stored.data.len() as u64;
        if range.start > range.end || range.end > len {
            return Err(TransferError::SourceRead(format!(
                "区间越界: {}..{} (文件大小 {})",
                range.start, range.end, len
            )));
        }
        Ok(stored.data.slice(range.start as usize..range.end as usize))
    }

    async fn list_directory(&self, dir: Uuid, _scope: &ItemScope) -> Result<DirectoryListing> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.failing_listings.contains(&dir) {
            return Err(TransferError::Storage(format!("列目录失败: {}", dir)));
        }
        if !state.directories.contains_key(&dir) {
            return Err(TransferError::Storage(format!("目录不存在: {}", dir)));
        }
        let mut listing = DirectoryListing {
            files: state
                .files
                .values()
                .filter(|f| f.meta.parent == dir)
                .map(|f| f.meta.clone())
                .collect(),
            directories: state
                .directories
                .values()
                .filter(|d| d.parent == Some(dir))
                .cloned()
                .collect(),
        };
        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        listing.directories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    async fn directory_size(&self, dir: Uuid, _scope: &ItemScope) -> Result<DirectorySize> {
        self.size_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if !state.directories.contains_key(&dir) {
            return Err(TransferError::Storage(format!("目录不存在: {}", dir)));
        }
        Ok(Self::size_of(&state, dir))
    }

    async fn item_name(&self, uuid: Uuid) -> Result<String> {
        let state = self.state.lock();
        if let Some(file) = state.files.get(&uuid) {
            return Ok(file.meta.name.clone());
        }
        if let Some(dir) = state.directories.get(&uuid) {
            return Ok(dir.name.clone());
        }
        Err(TransferError::Storage(format!("条目不存在: {}", uuid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_roundtrip() {
        let storage = MemoryStorage::new();
        let cancel = CancellationToken::new();
        let session = storage
            .begin_upload(storage.root(), "a.txt", 6, None)
            .await
            .unwrap();
        for (index, (offset, part)) in [(0u64, "abc"), (3, "def")].into_iter().enumerate() {
            let meta = ChunkMeta {
                upload_key: session.upload_key.clone(),
                index: index as u64,
                offset,
            };
            storage
                .upload_chunk(&meta, Bytes::from(part), &cancel)
                .await
                .unwrap();
        }
        let file = storage.finish_upload(&session).await.unwrap();
        assert_eq!(storage.file_content(file.uuid).unwrap(), Bytes::from("abcdef"));

        let chunk = storage
            .download_chunk(&file, ByteRange::new(2, 5), &cancel)
            .await
            .unwrap();
        assert_eq!(chunk, Bytes::from("cde"));
    }

    #[tokio::test]
    async fn test_directory_size_is_recursive() {
        let storage = MemoryStorage::new();
        let docs = storage.add_directory(storage.root(), "docs");
        let nested = storage.add_directory(docs.uuid, "nested");
        storage.add_file(docs.uuid, "a", vec![0u8; 10]);
        storage.add_file(nested.uuid, "b", vec![0u8; 5]);

        let size = storage
            .directory_size(docs.uuid, &ItemScope::owned())
            .await
            .unwrap();
        assert_eq!(
            size,
            DirectorySize {
                size: 15,
                files: 2,
                folders: 1
            }
        );
    }

    #[tokio::test]
    async fn test_create_directory_reuses_existing() {
        let storage = MemoryStorage::new();
        let a = storage.create_directory(storage.root(), "x").await.unwrap();
        let b = storage.create_directory(storage.root(), "x").await.unwrap();
        assert_eq!(a.uuid, b.uuid);
        assert_eq!(storage.created_directories(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_chunk_read() {
        let storage = MemoryStorage::new();
        let file = storage.add_file(storage.root(), "a", vec![1u8; 4]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = storage
            .download_chunk(&file, ByteRange::new(0, 4), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
