//! 归档任务规划
//!
//! 把若干远端文件/文件夹合并成一张扁平表：文件夹并发展开并加上自身名称前缀，
//! 单个文件视为只有一个条目的树。顶层同名条目先行改名，再统一扁平化。

use crate::error::Result;
use crate::signal::SignalHandle;
use crate::storage::{RemoteDirectory, RemoteItem};
use crate::tree::{disambiguate, flatten, DirectoryTreeEntry, FlatTree, RelativePath, TreeWalker};
use futures::future::try_join_all;
use std::collections::HashSet;
use tracing::debug;

/// 归档根目录名的后备值
pub const DEFAULT_ARCHIVE_ROOT: &str = "Download";

/// 规范化归档根名：去掉 `.zip` 后缀（大小写不敏感），空名退回 `Download`
pub fn archive_root_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let cut = trimmed.len().saturating_sub(4);
    let stripped = match trimmed.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".zip") => &trimmed[..cut],
        _ => trimmed,
    };
    // 根名作为一个路径段使用
    let stripped = stripped.trim().replace(['/', '\\'], "_");
    if stripped.is_empty() {
        DEFAULT_ARCHIVE_ROOT.to_string()
    } else {
        stripped
    }
}

/// 已规划好的归档任务
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    /// 归档内的根目录名
    pub root: String,
    pub tree: FlatTree,
}

impl ArchiveJob {
    /// 所有文件的总字节数（开始写出前确定）
    pub fn total_size(&self) -> u64 {
        self.tree.total_size()
    }

    /// 需要写入的成员（仅文件，浅层优先）
    pub fn members(&self) -> impl Iterator<Item = &DirectoryTreeEntry> {
        self.tree.files()
    }

    pub fn member_count(&self) -> usize {
        self.tree.file_count()
    }

    /// 成员在归档中的名称：`<root>/<相对路径>`
    pub fn member_name(&self, entry: &DirectoryTreeEntry) -> String {
        format!("{}/{}", self.root, entry.path.to_unrooted())
    }
}

/// 展开并合并所有条目
pub async fn plan_archive(
    walker: &TreeWalker,
    mut items: Vec<RemoteItem>,
    root: String,
    signal: &SignalHandle,
) -> Result<ArchiveJob> {
    // 改名结果与调用方给出的顺序无关
    items.sort_by(|a, b| {
        a.name()
            .to_lowercase()
            .cmp(&b.name().to_lowercase())
            .then_with(|| a.uuid().cmp(&b.uuid()))
    });

    let mut used: HashSet<String> = HashSet::new();
    let mut entries = Vec::new();
    let mut directories: Vec<(RelativePath, RemoteDirectory)> = Vec::new();
    for item in items {
        let mut prefix = RelativePath::root().join(item.name());
        if !used.insert(prefix.collision_key()) {
            prefix = disambiguate(&prefix, &used);
            used.insert(prefix.collision_key());
        }
        match item {
            RemoteItem::File(file) => entries.push(DirectoryTreeEntry::file(prefix, file)),
            RemoteItem::Directory(dir) => directories.push((prefix, dir)),
        }
    }

    // 所有目录都枚举完成后才开始写出
    let walked = try_join_all(directories.into_iter().map(|(prefix, dir)| async move {
        signal.checkpoint().await?;
        let children = walker.walk(&dir, signal).await?;
        Ok::<_, crate::error::TransferError>((prefix, dir, children))
    }))
    .await?;

    for (prefix, dir, children) in walked {
        entries.extend(children.into_iter().map(|child| child.prefixed(&prefix)));
        entries.push(DirectoryTreeEntry::directory(prefix, dir));
    }

    let tree = flatten(entries);
    debug!(
        "归档规划完成: {} ({} 个文件, {} 个改名)",
        root,
        tree.file_count(),
        tree.renamed
    );
    Ok(ArchiveJob { root, tree })
}
