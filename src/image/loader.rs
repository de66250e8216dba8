use crate::config::MAX_UPLOAD_SIZE;
use crate::utils::error::VisionError;
use crate::Result;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat, ImageReader, Limits};
use std::io::Cursor;

/// 单边最大像素数
pub const MAX_DIMENSION: u32 = 16384;

/// 解码器单张图像可分配的最大内存
pub const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

pub struct ImageLoader;

impl ImageLoader {
    /// 从base64字符串加载图像
    pub fn from_base64(base64_data: &str) -> Result<DynamicImage> {
        // 移除可能的数据URL前缀 (data:image/xxx;base64,)
        let base64_clean = match base64_data.strip_prefix("data:") {
            Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
            None => base64_data,
        };

        let image_bytes = base64::engine::general_purpose::STANDARD.decode(base64_clean.trim())?;

        Self::from_bytes(&image_bytes)
    }

    /// 从字节加载图像
    pub fn from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(VisionError::InvalidImage("image data is empty".to_string()));
        }

        if bytes.len() > MAX_UPLOAD_SIZE {
            return Err(VisionError::FileTooLarge(bytes.len(), MAX_UPLOAD_SIZE));
        }

        // 能识别出格式但不在支持列表中时明确拒绝
        if let Some(format) = Self::detect_format(bytes) {
            if !Self::is_supported_format(format) {
                return Err(VisionError::UnsupportedFormat(format!("{:?}", format)));
            }
        }

        let image = Self::decode(bytes)?;
        Self::validate_dimensions(&image)?;

        tracing::debug!(
            "Decoded image {}x{} ({} bytes)",
            image.width(),
            image.height(),
            bytes.len()
        );

        Ok(image)
    }

    /// 解码时限制尺寸与内存，超限的图像在分配像素缓冲之前就被拒绝
    fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        let mut limits = Limits::default();
        limits.max_image_width = Some(MAX_DIMENSION);
        limits.max_image_height = Some(MAX_DIMENSION);
        limits.max_alloc = Some(MAX_DECODE_ALLOC);

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(ImageError::IoError)?;
        reader.limits(limits);

        match reader.decode() {
            Ok(image) => Ok(image),
            Err(ImageError::Limits(e)) => Err(VisionError::InvalidImage(format!(
                "image exceeds decoding limits: {}",
                e
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// 检测图像格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// 验证图像格式是否支持
    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png
                | ImageFormat::Jpeg
                | ImageFormat::Gif
                | ImageFormat::Bmp
                | ImageFormat::Tiff
                | ImageFormat::WebP
        )
    }

    /// 验证图像尺寸
    pub fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width == 0 || height == 0 {
            return Err(VisionError::InvalidImage(format!(
                "image has zero size: {}x{}",
                width, height
            )));
        }

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(VisionError::InvalidImage(format!(
                "image too large: {}x{}, maximum {}x{}",
                width, height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok(())
    }
}
