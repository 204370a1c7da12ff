//! 远端存储数据类型

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 远端文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub uuid: Uuid,
    /// 所在目录
    pub parent: Uuid,
    pub name: String,
    /// 文件大小（字节）
    pub size: u64,
    pub mime: Option<String>,
}

impl RemoteFile {
    /// 是否为图片（上传后据此预生成缩略图）
    pub fn is_image(&self) -> bool {
        if let Some(mime) = &self.mime {
            return mime.starts_with("image/");
        }
        crate::thumbnail::ThumbnailKind::from_name(&self.name)
            == Some(crate::thumbnail::ThumbnailKind::Image)
    }
}

/// 远端目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDirectory {
    pub uuid: Uuid,
    /// 根目录没有父目录
    pub parent: Option<Uuid>,
    pub name: String,
}

/// 远端条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteItem {
    File(RemoteFile),
    Directory(RemoteDirectory),
}

impl RemoteItem {
    pub fn uuid(&self) -> Uuid {
        match self {
            RemoteItem::File(f) => f.uuid,
            RemoteItem::Directory(d) => d.uuid,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RemoteItem::File(f) => &f.name,
            RemoteItem::Directory(d) => &d.name,
        }
    }
}

/// 访问范围：自有、共享（分享者/接收者）、回收站、公开链接
///
/// 同一目录在不同范围下的聚合结果不同，缓存键必须包含完整范围
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemScope {
    pub sharer_id: u64,
    pub receiver_id: u64,
    pub trash: bool,
    pub link_id: Option<String>,
}

impl ItemScope {
    /// 自有文件
    pub fn owned() -> Self {
        Self::default()
    }

    pub fn shared(sharer_id: u64, receiver_id: u64) -> Self {
        Self {
            sharer_id,
            receiver_id,
            ..Self::default()
        }
    }

    pub fn trash() -> Self {
        Self {
            trash: true,
            ..Self::default()
        }
    }

    pub fn link(link_id: impl Into<String>) -> Self {
        Self {
            link_id: Some(link_id.into()),
            ..Self::default()
        }
    }
}

/// 目录聚合大小
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySize {
    /// 总字节数
    pub size: u64,
    /// 文件数
    pub files: u64,
    /// 子目录数
    pub folders: u64,
}

/// 目录单层列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub files: Vec<RemoteFile>,
    pub directories: Vec<RemoteDirectory>,
}

/// 上传会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// 服务端分配的上传标识
    pub upload_key: String,
    /// 预分配的文件 UUID
    pub uuid: Uuid,
    pub parent: Uuid,
    pub name: String,
    pub size: u64,
    pub mime: Option<String>,
}

/// 分片元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub upload_key: String,
    /// 分片序号（从 0 开始）
    pub index: u64,
    /// 分片在文件中的偏移
    pub offset: u64,
}

/// 字节区间 [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 把 [0, total) 切成固定大小的分片
    pub fn split(total: u64, chunk_size: u64) -> Vec<ByteRange> {
        let chunk_size = chunk_size.max(1);
        let mut ranges = Vec::new();
        let mut start = 0;
        while start < total {
            let end = (start + chunk_size).min(total);
            ranges.push(ByteRange::new(start, end));
            start = end;
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ranges() {
        let ranges = ByteRange::split(10, 4);
        assert_eq!(
            ranges,
            vec![ByteRange::new(0, 4), ByteRange::new(4, 8), ByteRange::new(8, 10)]
        );
        assert!(ByteRange::split(0, 4).is_empty());
    }

    #[test]
    fn test_image_detection() {
        let mut file = RemoteFile {
            uuid: Uuid::new_v4(),
            parent: Uuid::new_v4(),
            name: "photo.JPG".to_string(),
            size: 1,
            mime: None,
        };
        assert!(file.is_image());
        file.mime = Some("application/pdf".to_string());
        assert!(!file.is_image());
    }

    #[test]
    fn test_remote_item_tag() {
        let item = RemoteItem::Directory(RemoteDirectory {
            uuid: Uuid::nil(),
            parent: None,
            name: "docs".to_string(),
        });
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"type\":\"directory\""));
        assert_eq!(item.name(), "docs");
    }
}
