use super::path::RelativePath;
use crate::storage::{RemoteDirectory, RemoteFile, RemoteItem};
use serde::{Deserialize, Serialize};

/// 目录树条目：相对路径 + 远端条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryTreeEntry {
    pub path: RelativePath,
    pub item: RemoteItem,
}

impl DirectoryTreeEntry {
    pub fn file(path: RelativePath, file: RemoteFile) -> Self {
        Self {
            path,
            item: RemoteItem::File(file),
        }
    }

    pub fn directory(path: RelativePath, dir: RemoteDirectory) -> Self {
        Self {
            path,
            item: RemoteItem::Directory(dir),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.item, RemoteItem::File(_))
    }

    /// 文件字节数，目录为 0
    pub fn size(&self) -> u64 {
        match &self.item {
            RemoteItem::File(f) => f.size,
            RemoteItem::Directory(_) => 0,
        }
    }

    pub fn as_file(&self) -> Option<&RemoteFile> {
        match &self.item {
            RemoteItem::File(f) => Some(f),
            RemoteItem::Directory(_) => None,
        }
    }

    /// 给路径加前缀
    pub fn prefixed(self, prefix: &RelativePath) -> Self {
        Self {
            path: prefix.concat(&self.path),
            item: self.item,
        }
    }
}
