//! 上传数据源

use crate::error::{Result, TransferError};
use bytes::{Bytes, BytesMut};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};

/// 上传数据源
pub enum UploadSource {
    /// 本地文件
    Local(PathBuf),
    /// 内存数据
    Bytes(Bytes),
    /// 任意异步流，需提前给出大小
    Reader {
        reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        size: u64,
    },
}

impl std::fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadSource::Local(path) => f.debug_tuple("Local").field(path).finish(),
            UploadSource::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            UploadSource::Reader { size, .. } => write!(f, "Reader({} bytes)", size),
        }
    }
}

impl UploadSource {
    /// 源自带的名称（本地文件名）
    pub fn default_name(&self) -> Option<String> {
        match self {
            UploadSource::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            UploadSource::Bytes(_) | UploadSource::Reader { .. } => None,
        }
    }

    /// 源大小（开始前用于计算任务总大小）
    pub async fn size(&self) -> Result<u64> {
        match self {
            UploadSource::Local(path) => Ok(tokio::fs::metadata(path)
                .await
                .map_err(TransferError::from_io_read)?
                .len()),
            UploadSource::Bytes(data) => Ok(data.len() as u64),
            UploadSource::Reader { size, .. } => Ok(*size),
        }
    }

    /// 打开源，返回读取器和大小
    pub async fn open(self) -> Result<OpenedSource> {
        match self {
            UploadSource::Local(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(TransferError::from_io_read)?;
                let size = file
                    .metadata()
                    .await
                    .map_err(TransferError::from_io_read)?
                    .len();
                Ok(OpenedSource {
                    reader: Box::new(file),
                    size,
                })
            }
            UploadSource::Bytes(data) => {
                let size = data.len() as u64;
                Ok(OpenedSource {
                    reader: Box::new(std::io::Cursor::new(data)),
                    size,
                })
            }
            UploadSource::Reader { reader, size } => Ok(OpenedSource { reader, size }),
        }
    }
}

/// 已打开的源
pub struct OpenedSource {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    pub size: u64,
}

impl OpenedSource {
    /// 读满一个分片（源结束时可能不足），读完返回空
    pub async fn read_chunk(&mut self, chunk_size: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(chunk_size);
        let mut filled = 0;
        while filled < chunk_size {
            let n = self
                .reader
                .read(&mut buf[filled..])
                .await
                .map_err(TransferError::from_io_read)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_source_reads_in_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let source = UploadSource::Local(path);
        assert_eq!(source.default_name().as_deref(), Some("a.txt"));
        let mut opened = source.open().await.unwrap();
        assert_eq!(opened.size, 10);
        assert_eq!(opened.read_chunk(4).await.unwrap(), Bytes::from("0123"));
        assert_eq!(opened.read_chunk(4).await.unwrap(), Bytes::from("4567"));
        assert_eq!(opened.read_chunk(4).await.unwrap(), Bytes::from("89"));
        assert!(opened.read_chunk(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_local_file_is_read_error() {
        let source = UploadSource::Local(PathBuf::from("/definitely/not/here.bin"));
        assert!(matches!(
            source.open().await,
            Err(TransferError::SourceRead(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_source() {
        let (mut tx, rx) = tokio::io::duplex(16);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"abc").await.unwrap();
        });
        let mut opened = UploadSource::Reader {
            reader: Box::new(rx),
            size: 3,
        }
        .open()
        .await
        .unwrap();
        assert_eq!(opened.read_chunk(8).await.unwrap(), Bytes::from("abc"));
    }
}
