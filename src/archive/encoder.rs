//! ZIP 流式编码
//!
//! `ZipWriter` 以非 seek 模式写进共享缓冲区，调用方每写一段就把缓冲区里的
//! 字节取走交给下游目标，内存里只留当前分片的压缩结果。

use crate::error::{Result, TransferError};
use parking_lot::Mutex;
use std::io::{Seek, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// 编码器输出缓冲
#[derive(Debug, Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct ArchiveEncoder<W: Write + Seek> {
    zip: ZipWriter<W>,
    output: SharedBuffer,
}

/// 创建流式编码器
pub fn streaming_encoder() -> ArchiveEncoder<impl Write + Seek + Send> {
    let output = SharedBuffer::default();
    ArchiveEncoder {
        zip: ZipWriter::new_stream(output.clone()),
        output,
    }
}

impl<W: Write + Seek> ArchiveEncoder<W> {
    /// 开始一个新成员
    pub fn start_entry(&mut self, name: &str, size: u64) -> Result<()> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u32::MAX as u64);
        self.zip
            .start_file(name, options)
            .map_err(|e| TransferError::Encoding(format!("创建归档成员失败 {}: {}", name, e)))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.zip
            .write_all(data)
            .map_err(|e| TransferError::Encoding(format!("归档写入失败: {}", e)))
    }

    /// 取走已编码但尚未交给下游的字节
    pub fn take_output(&self) -> Vec<u8> {
        self.output.take()
    }

    /// 写中央目录并返回剩余字节
    pub fn finish(self) -> Result<Vec<u8>> {
        let output = self.output;
        self.zip
            .finish()
            .map_err(|e| TransferError::Encoding(format!("归档收尾失败: {}", e)))?;
        Ok(output.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_encoded_bytes_form_a_readable_archive() {
        let mut encoder = streaming_encoder();
        let mut archive = Vec::new();

        encoder.start_entry("root/a.txt", 5).unwrap();
        encoder.write(b"hello").unwrap();
        archive.extend(encoder.take_output());
        encoder.start_entry("root/sub/b.txt", 3).unwrap();
        encoder.write(b"abc").unwrap();
        archive.extend(encoder.take_output());
        archive.extend(encoder.finish().unwrap());

        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        assert_eq!(zip.len(), 2);
        let mut content = String::new();
        zip.by_name("root/sub/b.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "abc");
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let encoder = streaming_encoder();
        let bytes = encoder.finish().unwrap();
        let zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 0);
    }
}
