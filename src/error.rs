//! 传输错误类型
//!
//! 所有流水线共用的错误分类。取消单独建模，调用方据此决定是否提示用户。

use std::io;
use thiserror::Error;

/// 传输错误
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// 任务被取消（协作式，不算失败）
    #[error("任务已取消")]
    Cancelled,

    /// 源读取失败（远端存储或本地文件系统）
    #[error("读取源数据失败: {0}")]
    SourceRead(String),

    /// 目标写入失败（磁盘已满、不可写、已中止）
    #[error("写入目标失败: {0}")]
    SinkWrite(String),

    /// 归档或缩略图编码失败
    #[error("编码失败: {0}")]
    Encoding(String),

    /// 存储 API 调用失败
    #[error("存储接口错误: {0}")]
    Storage(String),

    /// 持久化缓存读写失败
    #[error("缓存错误: {0}")]
    Cache(String),

    /// 调用参数非法
    #[error("参数无效: {0}")]
    InvalidInput(String),

    /// 不支持的操作（例如未注册的缩略图生成器）
    #[error("不支持: {0}")]
    Unsupported(String),

    /// 多文件任务中部分子项失败
    #[error("{failed} 个子项失败，{succeeded} 个成功")]
    PartialFailure {
        failed: usize,
        succeeded: usize,
        failures: Vec<ConstituentFailure>,
    },
}

/// 多文件任务中单个子项的失败记录
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConstituentFailure {
    /// 子项相对路径
    pub path: String,
    /// 原始错误信息
    pub error: String,
}

impl TransferError {
    /// 是否为取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    /// 从 io::Error 还原传输错误
    ///
    /// 经过 AsyncRead/Write 适配层时，取消等错误会被包进 io::Error，这里拆回来
    pub fn from_io_read(err: io::Error) -> Self {
        match Self::unwrap_io(err) {
            Ok(inner) => inner,
            Err(err) => TransferError::SourceRead(err.to_string()),
        }
    }

    /// 同上，但未知 io 错误归类为写入失败
    pub fn from_io_write(err: io::Error) -> Self {
        match Self::unwrap_io(err) {
            Ok(inner) => inner,
            Err(err) => TransferError::SinkWrite(err.to_string()),
        }
    }

    fn unwrap_io(err: io::Error) -> std::result::Result<TransferError, io::Error> {
        let is_transfer = err
            .get_ref()
            .map(|inner| inner.is::<TransferError>())
            .unwrap_or(false);
        if !is_transfer {
            return Err(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<TransferError>()) {
            Some(Ok(inner)) => Ok(*inner),
            Some(Err(other)) => Err(io::Error::new(io::ErrorKind::Other, other)),
            None => Err(io::Error::new(io::ErrorKind::Other, "unknown io error")),
        }
    }

    /// 包装为 io::Error，供 AsyncRead 适配层使用
    pub fn into_io(self) -> io::Error {
        let kind = match self {
            TransferError::Cancelled => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
