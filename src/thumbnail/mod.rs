//! 缩略图模块

pub mod cache;
pub mod generator;
pub mod types;

pub use cache::{ThumbnailCache, ThumbnailCacheOptions};
pub use generator::{render_jpeg, ImageThumbnailer, ThumbnailGenerator};
pub use types::{
    RenderOptions, ThumbnailKind, ThumbnailRequest, ThumbnailSource, ThumbnailStatus,
    THUMBNAIL_VERSION,
};
