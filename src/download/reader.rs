//! 分片拉取
//!
//! 按固定大小顺序拉取远端文件，每片之前经过信号检查点

use crate::error::{Result, TransferError};
use crate::signal::SignalHandle;
use crate::storage::{ByteRange, RemoteFile, StorageApi};
use bytes::Bytes;
use std::sync::Arc;

pub struct ChunkReader {
    storage: Arc<dyn StorageApi>,
    file: RemoteFile,
    signal: SignalHandle,
    chunk_size: u64,
    offset: u64,
}

impl ChunkReader {
    pub fn new(
        storage: Arc<dyn StorageApi>,
        file: RemoteFile,
        signal: SignalHandle,
        chunk_size: u64,
    ) -> Self {
        Self {
            storage,
            file,
            signal,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 拉取下一片；读完返回 None
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.signal.checkpoint().await?;
        if self.offset >= self.file.size {
            return Ok(None);
        }

        let end = (self.offset + self.chunk_size).min(self.file.size);
        let range = ByteRange::new(self.offset, end);
        let cancel = self.signal.cancel_token();
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            chunk = self.storage.download_chunk(&self.file, range, cancel) => chunk?,
        };

        if chunk.len() as u64 != range.len() {
            return Err(TransferError::SourceRead(format!(
                "分片长度不符: {} 期望 {} 实际 {}",
                self.file.name,
                range.len(),
                chunk.len()
            )));
        }
        self.offset = end;
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_reads_in_order() {
        let storage = Arc::new(MemoryStorage::new());
        let file = storage.add_file(storage.root(), "a", (0u8..10).collect::<Vec<_>>());
        let mut reader = ChunkReader::new(storage, file, SignalHandle::detached("r"), 4);

        let mut out = Vec::new();
        let mut sizes = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            sizes.push(chunk.len());
            out.extend_from_slice(&chunk);
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(out, (0u8..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stops_after_cancel() {
        let storage = Arc::new(MemoryStorage::new());
        let file = storage.add_file(storage.root(), "a", vec![0u8; 10]);
        let signal = SignalHandle::detached("r");
        let mut reader = ChunkReader::new(storage, file, signal.clone(), 4);

        assert!(reader.next_chunk().await.unwrap().is_some());
        signal.cancel();
        assert!(reader.next_chunk().await.unwrap_err().is_cancelled());
        assert_eq!(reader.offset(), 4);
    }

    #[tokio::test]
    async fn test_truncated_chunk_is_read_error() {
        let storage = Arc::new(MemoryStorage::new());
        let mut file = storage.add_file(storage.root(), "a", vec![0u8; 4]);
        storage.replace_content(file.uuid, vec![0u8; 2]);
        file.size = 4;
        let mut reader = ChunkReader::new(storage, file, SignalHandle::detached("r"), 4);
        assert!(matches!(
            reader.next_chunk().await,
            Err(TransferError::SourceRead(_))
        ));
    }
}
