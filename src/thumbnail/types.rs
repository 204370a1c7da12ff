use crate::storage::RemoteFile;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 缩略图生成器版本，变更渲染参数或算法时递增，旧记录自然失效
pub const THUMBNAIL_VERSION: &str = "v1";

/// 缩略图类型（决定使用哪个生成器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailKind {
    Image,
    Video,
    Pdf,
}

impl ThumbnailKind {
    /// 按扩展名判断
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "ico" | "tif" | "tiff" => {
                Some(ThumbnailKind::Image)
            }
            "mp4" | "mkv" | "avi" | "mov" | "wmv" | "flv" | "webm" => Some(ThumbnailKind::Video),
            "pdf" => Some(ThumbnailKind::Pdf),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("image/") {
            Some(ThumbnailKind::Image)
        } else if mime.starts_with("video/") {
            Some(ThumbnailKind::Video)
        } else if mime == "application/pdf" {
            Some(ThumbnailKind::Pdf)
        } else {
            None
        }
    }
}

/// 原始数据来源
#[derive(Debug, Clone)]
pub enum ThumbnailSource {
    /// 远端文件，通过存储 API 拉取
    Remote(RemoteFile),
    /// 本地文件
    Local(PathBuf),
    /// 调用方已持有的数据
    Bytes(Bytes),
}

/// 缩略图请求
#[derive(Debug, Clone)]
pub struct ThumbnailRequest {
    pub item: Uuid,
    pub kind: ThumbnailKind,
    pub source: ThumbnailSource,
    /// 本次请求自己的取消令牌（排队等待期间也会观察）
    pub cancel: CancellationToken,
}

impl ThumbnailRequest {
    pub fn new(item: Uuid, kind: ThumbnailKind, source: ThumbnailSource) -> Self {
        Self {
            item,
            kind,
            source,
            cancel: CancellationToken::new(),
        }
    }

    /// 远端文件；类型按 mime 或扩展名推断，推断不出时按图片处理
    pub fn remote(file: RemoteFile) -> Self {
        let kind = file
            .mime
            .as_deref()
            .and_then(ThumbnailKind::from_mime)
            .or_else(|| ThumbnailKind::from_name(&file.name))
            .unwrap_or(ThumbnailKind::Image);
        Self::new(file.uuid, kind, ThumbnailSource::Remote(file))
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// 渲染参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// 最长边（像素）
    pub max_dimension: u32,
    /// JPEG 质量 (1-100)
    pub quality: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_dimension: 256,
            quality: 80,
        }
    }
}

/// 本次结果的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailStatus {
    /// 内存或持久化缓存命中
    CacheHit,
    /// 本次生成并已写入缓存
    Generated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_detection() {
        assert_eq!(ThumbnailKind::from_name("a.JPG"), Some(ThumbnailKind::Image));
        assert_eq!(ThumbnailKind::from_name("clip.mp4"), Some(ThumbnailKind::Video));
        assert_eq!(ThumbnailKind::from_name("doc.pdf"), Some(ThumbnailKind::Pdf));
        assert_eq!(ThumbnailKind::from_name("notes.txt"), None);
        assert_eq!(ThumbnailKind::from_name("noext"), None);
        assert_eq!(ThumbnailKind::from_mime("image/png"), Some(ThumbnailKind::Image));
    }
}
