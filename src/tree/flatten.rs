//! 目录树扁平化
//!
//! 多个来源合并成一张以相对路径为键的平表：
//! - 冲突检测大小写不敏感（目标可能是大小写不敏感的文件系统或解压工具）
//! - 同名目录合并，文件不会被覆盖或丢弃，而是改名为 `name (n).ext`
//! - 输出按深度升序、同深度按路径排序，改名结果与输入顺序无关

use super::entry::DirectoryTreeEntry;
use super::path::RelativePath;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// 扁平化结果
#[derive(Debug, Clone, Default)]
pub struct FlatTree {
    /// 排好序的条目
    pub entries: Vec<DirectoryTreeEntry>,
    /// 因冲突改名的文件数
    pub renamed: usize,
}

impl FlatTree {
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size()).sum()
    }

    pub fn files(&self) -> impl Iterator<Item = &DirectoryTreeEntry> {
        self.entries.iter().filter(|e| e.is_file())
    }

    pub fn file_count(&self) -> usize {
        self.files().count()
    }
}

/// 浅层优先，其次按路径，最后按条目 UUID 打破完全相同的路径
pub fn depth_order(a: &DirectoryTreeEntry, b: &DirectoryTreeEntry) -> Ordering {
    a.path
        .depth()
        .cmp(&b.path.depth())
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| a.item.uuid().cmp(&b.item.uuid()))
}

/// 扁平化并消解路径冲突
pub fn flatten(mut entries: Vec<DirectoryTreeEntry>) -> FlatTree {
    entries.sort_by(depth_order);

    let mut used: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(entries.len());

    // 目录先占位：同名目录合并，子项路径不需要改写
    let (directories, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| !e.is_file());
    for dir in directories {
        if used.insert(dir.path.collision_key()) {
            result.push(dir);
        }
    }

    let mut renamed = 0;
    for mut file in files {
        if !used.insert(file.path.collision_key()) {
            let unique = disambiguate(&file.path, &used);
            debug!("路径冲突，改名: {} -> {}", file.path, unique);
            used.insert(unique.collision_key());
            file.path = unique;
            renamed += 1;
        }
        result.push(file);
    }

    result.sort_by(depth_order);
    FlatTree {
        entries: result,
        renamed,
    }
}

/// 找到第一个未被占用的 `name (n).ext`
pub fn disambiguate(path: &RelativePath, used: &HashSet<String>) -> RelativePath {
    let name = path.file_name().unwrap_or_default();
    let (stem, ext) = split_extension(name);
    let mut n = 1usize;
    loop {
        let candidate = path.with_file_name(&format!("{} ({}){}", stem, n, ext));
        if !used.contains(&candidate.collision_key()) {
            return candidate;
        }
        n += 1;
    }
}

/// 拆分扩展名；以点开头的隐藏文件整体视为主名
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RemoteDirectory, RemoteFile};
    use uuid::Uuid;

    fn file(path: &str, uuid: u128) -> DirectoryTreeEntry {
        let path = RelativePath::parse(path).unwrap();
        DirectoryTreeEntry::file(
            path.clone(),
            RemoteFile {
                uuid: Uuid::from_u128(uuid),
                parent: Uuid::nil(),
                name: path.file_name().unwrap().to_string(),
                size: 1,
                mime: None,
            },
        )
    }

    fn dir(path: &str, uuid: u128) -> DirectoryTreeEntry {
        let path = RelativePath::parse(path).unwrap();
        DirectoryTreeEntry::directory(
            path.clone(),
            RemoteDirectory {
                uuid: Uuid::from_u128(uuid),
                parent: None,
                name: path.file_name().unwrap().to_string(),
            },
        )
    }

    fn paths(tree: &FlatTree) -> Vec<String> {
        tree.entries.iter().map(|e| e.path.to_string()).collect()
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a.txt"), ("a", ".txt"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
    }

    #[test]
    fn test_duplicates_get_distinct_names() {
        let tree = flatten(vec![file("/x/a.txt", 2), file("/x/a.txt", 1), file("/x/a.txt", 3)]);
        assert_eq!(paths(&tree), vec!["/x/a (1).txt", "/x/a (2).txt", "/x/a.txt"]);
        assert_eq!(tree.renamed, 2);
        // UUID 最小的保留原名
        let original = tree.entries.iter().find(|e| e.path.to_string() == "/x/a.txt").unwrap();
        assert_eq!(original.item.uuid(), Uuid::from_u128(1));
    }

    #[test]
    fn test_collision_is_case_insensitive() {
        let tree = flatten(vec![file("/a.TXT", 1), file("/A.txt", 2)]);
        assert_eq!(paths(&tree), vec!["/A.txt", "/a (1).TXT"]);
    }

    #[test]
    fn test_result_independent_of_input_order() {
        let a = flatten(vec![file("/a", 1), file("/a", 2), file("/b/c", 3)]);
        let b = flatten(vec![file("/b/c", 3), file("/a", 2), file("/a", 1)]);
        assert_eq!(a.entries, b.entries);
    }

    #[test]
    fn test_directories_merge_and_files_avoid_them() {
        let tree = flatten(vec![
            dir("/docs", 1),
            dir("/Docs", 2),
            file("/docs", 3),
            file("/docs/x.md", 4),
        ]);
        // 大写排在前面，先占位的目录名保留
        assert_eq!(paths(&tree), vec!["/Docs", "/docs (1)", "/docs/x.md"]);
        assert_eq!(tree.file_count(), 2);
        assert_eq!(tree.total_size(), 2);
    }

    #[test]
    fn test_sorted_shallow_first() {
        let tree = flatten(vec![file("/z/y/x", 1), file("/b", 2), file("/a/c", 3)]);
        assert_eq!(paths(&tree), vec!["/b", "/a/c", "/z/y/x"]);
    }
}
