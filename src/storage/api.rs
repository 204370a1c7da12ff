//! 存储 API 抽象
//!
//! 网络传输、加解密由外部客户端负责，这里只约定流水线需要的几个调用。
//! 分片读写都接收取消令牌，实现方应在令牌触发后尽快返回 `TransferError::Cancelled`。

use super::types::{
    ByteRange, ChunkMeta, DirectoryListing, DirectorySize, ItemScope, RemoteDirectory, RemoteFile,
    UploadSession,
};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[async_trait]
pub trait StorageApi: Send + Sync {
    /// 开始一次文件上传，返回会话
    async fn begin_upload(
        &self,
        parent: Uuid,
        name: &str,
        size: u64,
        mime: Option<&str>,
    ) -> Result<UploadSession>;

    /// 上传一个分片
    async fn upload_chunk(
        &self,
        meta: &ChunkMeta,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// 所有分片上传完成后提交，返回远端文件
    async fn finish_upload(&self, session: &UploadSession) -> Result<RemoteFile>;

    /// 在 `parent` 下创建目录；同名目录已存在时返回已有目录
    async fn create_directory(&self, parent: Uuid, name: &str) -> Result<RemoteDirectory>;

    /// 下载文件的一个字节区间
    async fn download_chunk(
        &self,
        file: &RemoteFile,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> Result<Bytes>;

    /// 列出目录的直接子项
    async fn list_directory(&self, dir: Uuid, scope: &ItemScope) -> Result<DirectoryListing>;

    /// 服务端计算目录聚合大小（开销大，调用方应经过缓存）
    async fn directory_size(&self, dir: Uuid, scope: &ItemScope) -> Result<DirectorySize>;

    /// 查询条目名称
    async fn item_name(&self, uuid: Uuid) -> Result<String>;
}
