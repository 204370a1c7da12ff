//! 本地文件夹扫描
//!
//! 负责:
//! - 递归扫描本地文件夹（含空目录，上传时需要在远端建出来）
//! - 跳过隐藏文件、符号链接和非常规文件
//! - 计算相对于扫描根目录的路径

use super::path::RelativePath;
use crate::common::format_bytes;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// 扫描到的本地条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    /// 本地绝对路径
    pub local_path: PathBuf,
    /// 相对于扫描根目录的路径
    pub relative_path: RelativePath,
    /// 文件大小，目录为 0
    pub size: u64,
    pub is_dir: bool,
}

/// 扫描配置
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 跟随符号链接
    pub follow_symlinks: bool,
    /// 跳过以 `.` 开头的文件和文件夹
    pub skip_hidden: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            skip_hidden: true,
        }
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// 递归扫描文件夹，结果按相对路径排序
pub fn scan_local_directory(root: &Path, options: &ScanOptions) -> Result<Vec<ScannedEntry>> {
    if !root.is_dir() {
        anyhow::bail!("扫描路径不是文件夹: {}", root.display());
    }
    info!("开始扫描文件夹: {}", root.display());

    let walker = WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .into_iter()
        .filter_entry(|e| !(options.skip_hidden && is_hidden(e)));

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("读取目录失败: {}", root.display()))?;
        if entry.depth() == 0 {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("计算相对路径失败: {}", entry.path().display()))?;
        let relative_path = RelativePath::parse(&relative.to_string_lossy())
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let file_type = entry.file_type();
        if file_type.is_dir() {
            entries.push(ScannedEntry {
                local_path: entry.path().to_path_buf(),
                relative_path,
                size: 0,
                is_dir: true,
            });
        } else if file_type.is_file() {
            let size = entry
                .metadata()
                .with_context(|| format!("读取文件元数据失败: {}", entry.path().display()))?
                .len();
            entries.push(ScannedEntry {
                local_path: entry.path().to_path_buf(),
                relative_path,
                size,
                is_dir: false,
            });
        } else {
            debug!("跳过非常规文件: {}", entry.path().display());
        }
    }

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    let files: Vec<_> = entries.iter().filter(|e| !e.is_dir).collect();
    info!(
        "文件夹扫描完成: {} 个文件，总大小 {}",
        files.len(),
        format_bytes(files.iter().map(|f| f.size).sum())
    );
    Ok(entries)
}
