//! 远端目录递归枚举
//!
//! 子目录并发展开，列目录请求数由信号量限制；许可只在单次列目录期间持有，
//! 不跨递归，深层目录不会因为祖先占着许可而死锁。

use super::entry::DirectoryTreeEntry;
use super::path::RelativePath;
use crate::error::{Result, TransferError};
use crate::signal::SignalHandle;
use crate::storage::{DirectoryListing, ItemScope, RemoteDirectory, StorageApi};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

/// 目录树遍历器
#[derive(Clone)]
pub struct TreeWalker {
    storage: Arc<dyn StorageApi>,
    scope: ItemScope,
    permits: Arc<Semaphore>,
}

impl TreeWalker {
    pub fn new(storage: Arc<dyn StorageApi>, scope: ItemScope, max_concurrent_listings: usize) -> Self {
        Self {
            storage,
            scope,
            permits: Arc::new(Semaphore::new(max_concurrent_listings.max(1))),
        }
    }

    /// 枚举目录下所有文件和子目录，路径相对于 `dir`，按路径排序
    pub async fn walk(
        &self,
        dir: &RemoteDirectory,
        signal: &SignalHandle,
    ) -> Result<Vec<DirectoryTreeEntry>> {
        let mut entries = self
            .walk_recursive(dir.uuid, RelativePath::root(), signal)
            .await?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            "目录枚举完成: {} ({} 个条目)",
            dir.name,
            entries.len()
        );
        Ok(entries)
    }

    #[async_recursion::async_recursion]
    async fn walk_recursive(
        &self,
        dir: Uuid,
        prefix: RelativePath,
        signal: &SignalHandle,
    ) -> Result<Vec<DirectoryTreeEntry>> {
        signal.checkpoint().await?;
        let listing = self.list(dir, signal).await?;

        let mut entries = Vec::with_capacity(listing.files.len() + listing.directories.len());
        for file in listing.files {
            entries.push(DirectoryTreeEntry::file(prefix.join(&file.name), file));
        }

        let mut children = Vec::with_capacity(listing.directories.len());
        for sub in listing.directories {
            let path = prefix.join(&sub.name);
            children.push(self.walk_recursive(sub.uuid, path.clone(), signal));
            entries.push(DirectoryTreeEntry::directory(path, sub));
        }

        for nested in futures::future::try_join_all(children).await? {
            entries.extend(nested);
        }
        Ok(entries)
    }

    async fn list(&self, dir: Uuid, signal: &SignalHandle) -> Result<DirectoryListing> {
        let _permit = tokio::select! {
            _ = signal.cancel_token().cancelled() => return Err(TransferError::Cancelled),
            permit = self.permits.acquire() => permit
                .map_err(|_| TransferError::Storage("列目录许可已关闭".to_string()))?,
        };
        self.storage.list_directory(dir, &self.scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn sample() -> (Arc<MemoryStorage>, RemoteDirectory) {
        let storage = Arc::new(MemoryStorage::new());
        let docs = storage.add_directory(storage.root(), "docs");
        storage.add_file(docs.uuid, "a.txt", vec![1u8; 10]);
        let sub = storage.add_directory(docs.uuid, "sub");
        storage.add_file(sub.uuid, "b.txt", vec![2u8; 20]);
        let deep = storage.add_directory(sub.uuid, "deep");
        storage.add_file(deep.uuid, "c.txt", vec![3u8; 5]);
        storage.add_directory(docs.uuid, "empty");
        (storage, docs)
    }

    #[tokio::test]
    async fn test_walk_lists_everything() {
        let (storage, docs) = sample();
        let walker = TreeWalker::new(storage.clone(), ItemScope::owned(), 2);
        let entries = walker.walk(&docs, &SignalHandle::detached("walk")).await.unwrap();

        let paths: Vec<_> = entries.iter().map(|e| e.path.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "/a.txt",
                "/empty",
                "/sub",
                "/sub/b.txt",
                "/sub/deep",
                "/sub/deep/c.txt"
            ]
        );
        let total: u64 = entries.iter().map(|e| e.size()).sum();
        assert_eq!(total, 35);
        assert_eq!(storage.list_calls(), 4);
    }

    #[tokio::test]
    async fn test_walk_with_single_permit_does_not_deadlock() {
        let (storage, docs) = sample();
        let walker = TreeWalker::new(storage, ItemScope::owned(), 1);
        let entries = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            walker.walk(&docs, &SignalHandle::detached("walk")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(entries.len(), 6);
    }

    #[tokio::test]
    async fn test_walk_propagates_listing_failure() {
        let (storage, docs) = sample();
        let sub = storage.find_directory(docs.uuid, "sub").unwrap();
        storage.fail_listing_of(sub.uuid);
        let walker = TreeWalker::new(storage, ItemScope::owned(), 4);
        let result = walker.walk(&docs, &SignalHandle::detached("walk")).await;
        assert!(matches!(result, Err(TransferError::Storage(_))));
    }

    #[tokio::test]
    async fn test_walk_observes_cancel() {
        let (storage, docs) = sample();
        let walker = TreeWalker::new(storage, ItemScope::owned(), 4);
        let signal = SignalHandle::detached("walk");
        signal.cancel();
        let err = walker.walk(&docs, &signal).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
