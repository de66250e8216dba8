use crate::models::{ChannelOrder, ModelEntry, Normalization};
use crate::utils::error::VisionError;
use crate::Result;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// 模型可直接使用的输入及其到原图的映射关系
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    /// [1, 3, H, W]
    pub tensor: Array4<f32>,
    /// target_w / source_w
    pub scale_x: f64,
    /// target_h / source_h
    pub scale_y: f64,
    /// (width, height)
    pub source_size: (u32, u32),
}

/// 图像预处理：整体拉伸到模型输入尺寸（不保持宽高比、不加边），
/// 归一化到 [0,1]，按需做均值方差归一化，输出 NCHW
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocessor {
    /// (width, height)
    target_size: (u32, u32),
    channel_order: ChannelOrder,
    normalization: Option<Normalization>,
}

impl Preprocessor {
    pub fn new(target_size: (u32, u32), channel_order: ChannelOrder, normalization: Option<Normalization>) -> Self {
        Self {
            target_size,
            channel_order,
            normalization,
        }
    }

    pub fn for_entry(entry: &ModelEntry) -> Self {
        Self::new(entry.input_size, entry.channel_order, entry.normalization)
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }

    pub fn preprocess(&self, image: &RgbImage) -> Result<PreprocessedImage> {
        let (src_w, src_h) = image.dimensions();
        if src_w == 0 || src_h == 0 {
            return Err(VisionError::InvalidImage(format!(
                "image has zero size: {}x{}",
                src_w, src_h
            )));
        }

        let (target_w, target_h) = self.target_size;
        if target_w == 0 || target_h == 0 {
            return Err(VisionError::Geometry(format!(
                "invalid target size {}x{}",
                target_w, target_h
            )));
        }

        let resized = if (src_w, src_h) == self.target_size {
            image.clone()
        } else {
            imageops::resize(image, target_w, target_h, imageops::FilterType::Triangle)
        };

        // 解码结果为 RGB，BGR 模型需要交换通道
        let channel_map: [usize; 3] = match self.channel_order {
            ChannelOrder::Rgb => [0, 1, 2],
            ChannelOrder::Bgr => [2, 1, 0],
        };

        let (h, w) = (target_h as usize, target_w as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, &src_c) in channel_map.iter().enumerate() {
                let mut value = pixel[src_c] as f32 / 255.0;
                if let Some(norm) = &self.normalization {
                    value = (value - norm.mean[c]) / norm.std[c];
                }
                tensor[[0, c, y as usize, x as usize]] = value;
            }
        }

        let scale_x = target_w as f64 / src_w as f64;
        let scale_y = target_h as f64 / src_h as f64;

        tracing::debug!(
            "Preprocessed {}x{} -> {}x{}, scale=({:.4}, {:.4})",
            src_w,
            src_h,
            target_w,
            target_h,
            scale_x,
            scale_y
        );

        Ok(PreprocessedImage {
            tensor,
            scale_x,
            scale_y,
            source_size: (src_w, src_h),
        })
    }
}
