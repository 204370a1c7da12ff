//! 缩略图生成器
//!
//! 每种类型一个策略；内置图片生成器，视频和 PDF 由宿主注册

use super::types::RenderOptions;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;

#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// 由原始数据生成 JPEG 缩略图
    async fn generate(&self, input: Bytes, options: &RenderOptions) -> Result<Bytes>;
}

/// 图片缩略图（解码、缩放在阻塞线程池里做）
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageThumbnailer;

#[async_trait]
impl ThumbnailGenerator for ImageThumbnailer {
    async fn generate(&self, input: Bytes, options: &RenderOptions) -> Result<Bytes> {
        let options = *options;
        tokio::task::spawn_blocking(move || render_jpeg(&input, &options))
            .await
            .map_err(|e| TransferError::Encoding(format!("缩略图线程异常: {}", e)))?
            .map(Bytes::from)
    }
}

/// 解码 → 等比缩放到最长边不超过 `max_dimension` → JPEG 编码
pub fn render_jpeg(input: &[u8], options: &RenderOptions) -> Result<Vec<u8>> {
    let img = image::load_from_memory(input)
        .map_err(|e| TransferError::Encoding(format!("图片解码失败: {}", e)))?;

    let max = options.max_dimension.max(1);
    let img = if img.width() > max || img.height() > max {
        img.thumbnail(max, max)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, options.quality.clamp(1, 100))
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| TransferError::Encoding(format!("JPEG 编码失败: {}", e)))?;
    Ok(out)
}
