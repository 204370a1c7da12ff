//! 目录树
//!
//! - `path.rs`: 规范化的相对路径
//! - `walker.rs`: 远端目录递归枚举
//! - `flatten.rs`: 扁平化与路径冲突消解
//! - `local.rs`: 本地文件夹扫描

mod entry;
mod flatten;
mod local;
mod path;
mod walker;

pub use entry::DirectoryTreeEntry;
pub use flatten::{depth_order, disambiguate, flatten, split_extension, FlatTree};
pub use local::{scan_local_directory, ScanOptions, ScannedEntry};
pub use path::RelativePath;
pub use walker::TreeWalker;
