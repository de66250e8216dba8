use crate::utils::error::VisionError;
use crate::Result;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};

/// 调试用的图像输出通道
pub trait ImageSink: Send + Sync {
    fn save(&self, image: &DynamicImage) -> Result<PathBuf>;
}

/// 将收到的图像以 JPEG 保存到目录中，文件名形如 `image_<时间戳>_<短 id>.jpg`
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            VisionError::Config(format!(
                "Failed to create image directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        tracing::info!("Saving processed images to {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_path(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.dir.join(format!("image_{}_{}.jpg", timestamp, &id[..8]))
    }
}

impl ImageSink for DirectorySink {
    fn save(&self, image: &DynamicImage) -> Result<PathBuf> {
        let path = self.next_path();
        // JPEG 不支持 alpha 通道
        DynamicImage::ImageRgb8(image.to_rgb8())
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| VisionError::Encode(e.to_string()))?;

        tracing::debug!("Image saved to {}", path.display());
        Ok(path)
    }
}
