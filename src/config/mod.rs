// 配置管理模块

use crate::archive::ArchiveOptions;
use crate::download::DownloadOptions;
use crate::thumbnail::{RenderOptions, ThumbnailCacheOptions, THUMBNAIL_VERSION};
use crate::upload::{FailurePolicy, UploadOptions};
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传/下载配置
    #[serde(default)]
    pub transfer: TransferConfig,
    /// 打包下载配置
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// 缩略图配置
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    /// 文件夹大小缓存配置
    #[serde(default)]
    pub size_cache: SizeCacheConfig,
    /// 持久化缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 上传/下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// 分片大小（字节，默认 1MB）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 文件夹上传时同时上传的文件数
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_uploads: usize,
    /// 文件夹下载时同时下载的文件数
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_downloads: usize,
    /// 遍历目录时同时进行的列目录请求数
    #[serde(default = "default_max_concurrent_listings")]
    pub max_concurrent_listings: usize,
    /// 进度事件节流间隔（毫秒，0 表示不节流）
    #[serde(default = "default_progress_throttle_ms")]
    pub progress_throttle_ms: u64,
    /// 图片上传后是否预生成缩略图
    #[serde(default = "default_true")]
    pub pregenerate_thumbnails: bool,
    /// 文件夹上传的默认失败策略
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_chunk_size() -> u64 {
    1024 * 1024
}

fn default_max_concurrent_files() -> usize {
    4
}

fn default_max_concurrent_listings() -> usize {
    8
}

fn default_progress_throttle_ms() -> u64 {
    crate::common::DEFAULT_THROTTLE_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_uploads: default_max_concurrent_files(),
            max_concurrent_downloads: default_max_concurrent_files(),
            max_concurrent_listings: default_max_concurrent_listings(),
            progress_throttle_ms: default_progress_throttle_ms(),
            pregenerate_thumbnails: true,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// 打包下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// 读取成员时的分片大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 展开目录时的并发列目录数
    #[serde(default = "default_max_concurrent_listings")]
    pub max_concurrent_listings: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_listings: default_max_concurrent_listings(),
        }
    }
}

/// 缩略图配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// 同时生成的缩略图数（全局）
    #[serde(default = "default_thumbnail_concurrency")]
    pub max_concurrent: usize,
    /// 最长边（像素）
    #[serde(default = "default_thumbnail_dimension")]
    pub max_dimension: u32,
    /// JPEG 质量
    #[serde(default = "default_thumbnail_quality")]
    pub quality: u8,
    /// 生成器版本标记，修改后旧缓存自动失效
    #[serde(default = "default_thumbnail_version")]
    pub version: String,
    /// 原始文件大小上限（MB）
    #[serde(default = "default_thumbnail_max_source_mb")]
    pub max_source_mb: u64,
}

fn default_thumbnail_concurrency() -> usize {
    3
}

fn default_thumbnail_dimension() -> u32 {
    256
}

fn default_thumbnail_quality() -> u8 {
    80
}

fn default_thumbnail_version() -> String {
    THUMBNAIL_VERSION.to_string()
}

fn default_thumbnail_max_source_mb() -> u64 {
    64
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_thumbnail_concurrency(),
            max_dimension: default_thumbnail_dimension(),
            quality: default_thumbnail_quality(),
            version: default_thumbnail_version(),
            max_source_mb: default_thumbnail_max_source_mb(),
        }
    }
}

/// 文件夹大小缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeCacheConfig {
    /// 同一 key 两次重新计算的最小间隔（秒）
    #[serde(default = "default_recompute_window_secs")]
    pub recompute_window_secs: u64,
}

fn default_recompute_window_secs() -> u64 {
    crate::common::DEFAULT_RECOMPUTE_WINDOW_SECS
}

impl Default for SizeCacheConfig {
    fn default() -> Self {
        Self {
            recompute_window_secs: default_recompute_window_secs(),
        }
    }
}

/// 持久化缓存后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// SQLite 文件
    #[default]
    Sqlite,
    /// 仅内存（进程退出即丢失）
    Memory,
}

/// 持久化缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// SQLite 数据库路径
    #[serde(default = "default_cache_db_path")]
    pub db_path: PathBuf,
}

fn default_cache_db_path() -> PathBuf {
    PathBuf::from("data/cache.db")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            db_path: default_cache_db_path(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {:#}", e);
                }
                default_config
            }
        }
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        ensure!(self.transfer.chunk_size > 0, "transfer.chunk_size 必须大于 0");
        ensure!(
            self.transfer.max_concurrent_uploads > 0,
            "transfer.max_concurrent_uploads 必须大于 0"
        );
        ensure!(
            self.transfer.max_concurrent_downloads > 0,
            "transfer.max_concurrent_downloads 必须大于 0"
        );
        ensure!(
            self.transfer.max_concurrent_listings > 0,
            "transfer.max_concurrent_listings 必须大于 0"
        );
        ensure!(self.archive.chunk_size > 0, "archive.chunk_size 必须大于 0");
        ensure!(
            self.archive.max_concurrent_listings > 0,
            "archive.max_concurrent_listings 必须大于 0"
        );
        ensure!(
            self.thumbnail.max_concurrent > 0,
            "thumbnail.max_concurrent 必须大于 0"
        );
        ensure!(
            self.thumbnail.max_dimension > 0,
            "thumbnail.max_dimension 必须大于 0"
        );
        ensure!(
            (1..=100).contains(&self.thumbnail.quality),
            "thumbnail.quality 必须在 1-100 之间，当前: {}",
            self.thumbnail.quality
        );
        ensure!(
            !self.thumbnail.version.trim().is_empty() && !self.thumbnail.version.contains(':'),
            "thumbnail.version 不能为空或包含冒号"
        );
        ensure!(
            !self.log.level.trim().is_empty(),
            "log.level 不能为空"
        );
        Ok(())
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            chunk_size: self.transfer.chunk_size,
            max_concurrent_files: self.transfer.max_concurrent_uploads,
            pregenerate_thumbnails: self.transfer.pregenerate_thumbnails,
        }
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            chunk_size: self.transfer.chunk_size,
            max_concurrent_files: self.transfer.max_concurrent_downloads,
            max_concurrent_listings: self.transfer.max_concurrent_listings,
        }
    }

    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            chunk_size: self.archive.chunk_size,
            max_concurrent_listings: self.archive.max_concurrent_listings,
        }
    }

    pub fn thumbnail_options(&self) -> ThumbnailCacheOptions {
        ThumbnailCacheOptions {
            max_concurrent: self.thumbnail.max_concurrent,
            version: self.thumbnail.version.clone(),
            render: RenderOptions {
                max_dimension: self.thumbnail.max_dimension,
                quality: self.thumbnail.quality,
            },
            max_source_bytes: self.thumbnail.max_source_mb * 1024 * 1024,
            chunk_size: self.transfer.chunk_size,
        }
    }

    pub fn recompute_window(&self) -> Duration {
        Duration::from_secs(self.size_cache.recompute_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.transfer.chunk_size, 1024 * 1024);
        assert_eq!(config.thumbnail.max_concurrent, 3);
        assert_eq!(config.recompute_window(), Duration::from_secs(30));
        assert_eq!(config.transfer.progress_throttle_ms, 200);
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("app.toml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.thumbnail.version = "v7".to_string();
        config.transfer.failure_policy = FailurePolicy::AllowPartial;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.thumbnail.version, "v7");
        assert_eq!(loaded.transfer.failure_policy, FailurePolicy::AllowPartial);
        assert_eq!(loaded.thumbnail_options().version, "v7");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [thumbnail]
            max_concurrent = 5

            [cache]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.thumbnail.max_concurrent, 5);
        assert_eq!(config.thumbnail.quality, 80);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.transfer.max_concurrent_uploads, 4);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.thumbnail.quality = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.thumbnail.version = "a:b".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let config = AppConfig::load_or_default(path.to_str().unwrap()).await;
        assert_eq!(config.thumbnail.max_concurrent, 3);
        assert!(path.exists());
    }
}
