//! 下载目标
//!
//! 流水线只通过 `TransferSink` 写出数据：
//! - 成功时调用 `finish`，数据才算落地
//! - 取消或失败时调用 `abort`，不留下被截断但看似完整的输出

use crate::error::{Result, TransferError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

#[async_trait]
pub trait TransferSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// 写完并提交
    async fn finish(self: Box<Self>) -> Result<()>;

    /// 丢弃已写入的部分
    async fn abort(self: Box<Self>, reason: &TransferError);
}

/// 本地文件目标
///
/// 先写 `<name>.part`，finish 时重命名为目标文件，abort 时删除
pub struct FileSink {
    target: PathBuf,
    part: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl FileSink {
    pub async fn create(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(TransferError::from_io_write)?;
        }
        let part = part_path(&target);
        let file = File::create(&part)
            .await
            .map_err(TransferError::from_io_write)?;
        debug!("创建临时文件: {:?}", part);
        Ok(Self {
            target,
            part,
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

/// `a/b.txt` -> `a/b.txt.part`
pub fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

#[async_trait]
impl TransferSink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TransferError::SinkWrite("文件已关闭".to_string()))?;
        writer
            .write_all(chunk)
            .await
            .map_err(TransferError::from_io_write)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| TransferError::SinkWrite("文件已关闭".to_string()))?;
        writer.flush().await.map_err(TransferError::from_io_write)?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(TransferError::from_io_write)?;
        drop(writer);
        tokio::fs::rename(&self.part, &self.target)
            .await
            .map_err(TransferError::from_io_write)?;
        debug!("文件写入完成: {:?} ({} bytes)", self.target, self.written);
        Ok(())
    }

    async fn abort(mut self: Box<Self>, reason: &TransferError) {
        self.writer.take();
        if let Err(e) = tokio::fs::remove_file(&self.part).await {
            warn!("删除临时文件失败: {:?}, 错误: {}", self.part, e);
        } else {
            debug!("已丢弃临时文件: {:?} (原因: {})", self.part, reason);
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // 既没 finish 也没 abort（任务被强制终止），同步清理临时文件
        if self.writer.take().is_some() {
            let _ = std::fs::remove_file(&self.part);
        }
    }
}

/// 通用流目标
///
/// 流没有"删除"的概念，abort 时关闭流并记录截断
pub struct WriterSink<W> {
    writer: W,
    written: u64,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransferSink for WriterSink<W> {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(TransferError::from_io_write)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(TransferError::from_io_write)
    }

    async fn abort(mut self: Box<Self>, reason: &TransferError) {
        warn!(
            "输出流已中止，已写入 {} bytes 的内容不完整: {}",
            self.written, reason
        );
        let _ = self.writer.shutdown().await;
    }
}

/// 内存目标的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    Open,
    Finished,
    Aborted,
}

#[derive(Debug)]
struct BufferState {
    data: Vec<u8>,
    status: BufferStatus,
}

/// 内存目标的共享视图
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    state: Arc<Mutex<BufferState>>,
}

impl MemoryBuffer {
    pub fn bytes(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> BufferStatus {
        self.state.lock().status
    }
}

/// 内存目标，abort 时清空
pub struct MemorySink {
    state: Arc<Mutex<BufferState>>,
}

impl MemorySink {
    pub fn new() -> (Self, MemoryBuffer) {
        let state = Arc::new(Mutex::new(BufferState {
            data: Vec::new(),
            status: BufferStatus::Open,
        }));
        (
            Self {
                state: state.clone(),
            },
            MemoryBuffer { state },
        )
    }
}

#[async_trait]
impl TransferSink for MemorySink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.status != BufferStatus::Open {
            return Err(TransferError::SinkWrite("缓冲区已关闭".to_string()));
        }
        state.data.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        self.state.lock().status = BufferStatus::Finished;
        Ok(())
    }

    async fn abort(self: Box<Self>, _reason: &TransferError) {
        let mut state = self.state.lock();
        state.data.clear();
        state.status = BufferStatus::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_file_sink_finish_renames() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out").join("a.txt");
        let mut sink = Box::new(FileSink::create(&target).await.unwrap());
        sink.write(b"hello ").await.unwrap();
        sink.write(b"world").await.unwrap();
        assert!(part_path(&target).exists());
        assert!(!target.exists());

        sink.finish().await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"hello world");
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn test_file_sink_abort_removes_partial() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");
        let mut sink = Box::new(FileSink::create(&target).await.unwrap());
        sink.write(b"partial").await.unwrap();
        sink.abort(&TransferError::Cancelled).await;
        assert!(!target.exists());
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn test_file_sink_drop_cleans_up() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");
        {
            let mut sink = FileSink::create(&target).await.unwrap();
            sink.write(b"x").await.unwrap();
        }
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn test_writer_sink_streams() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut sink = Box::new(WriterSink::new(client));
        sink.write(b"abc").await.unwrap();
        sink.finish().await.unwrap();

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn test_memory_sink_abort_clears() {
        let (mut sink, buffer) = MemorySink::new();
        sink.write(b"abc").await.unwrap();
        assert_eq!(buffer.len(), 3);
        Box::new(sink).abort(&TransferError::Cancelled).await;
        assert!(buffer.is_empty());
        assert_eq!(buffer.status(), BufferStatus::Aborted);
    }
}
