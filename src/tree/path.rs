//! 相对路径
//!
//! posix 风格、以 `/` 开头；段内不含 `/`，不会出现空段、`.` 或 `..`

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath {
    segments: Vec<String>,
}

impl RelativePath {
    /// 根路径 `/`
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// 解析路径；空段和 `.` 忽略，`..` 拒绝
    ///
    /// `\` 同样视为分隔符（Windows 本地路径）
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in raw.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(TransferError::InvalidInput(format!(
                        "路径不能包含 '..': {}",
                        raw
                    )))
                }
                s => segments.push(s.to_string()),
            }
        }
        Ok(Self { segments })
    }

    /// 追加一段；名称中的分隔符和保留名替换为 `_`
    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(sanitize_segment(name));
        Self { segments }
    }

    /// 拼接另一个相对路径
    pub fn concat(&self, other: &RelativePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 深度：`/a` 为 1，`/a/b` 为 2
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<RelativePath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// 替换最后一段
    pub fn with_file_name(&self, name: &str) -> Self {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => Self::root().join(name),
        }
    }

    /// 不带前导 `/` 的形式，用作归档成员名或本地相对路径
    pub fn to_unrooted(&self) -> String {
        self.segments.join("/")
    }

    /// 大小写不敏感的比较键
    pub fn collision_key(&self) -> String {
        self.to_string().to_lowercase()
    }
}

fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for RelativePath {
    type Error = TransferError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RelativePath> for String {
    fn from(value: RelativePath) -> Self {
        value.to_string()
    }
}
