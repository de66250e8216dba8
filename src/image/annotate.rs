use crate::image::postprocessing::Detection;
use crate::utils::error::VisionError;
use crate::Result;
use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::io::Cursor;
use std::path::Path;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;

/// 内置标签字体
const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// 在原图副本上绘制检测框与标签。
///
/// 默认使用内置字体，可通过 `--font` 换成其他 TTF。
#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
    font_size: f32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    pub fn new() -> Self {
        let font = match FontArc::try_from_slice(DEFAULT_FONT) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!("Built-in annotation font unusable, labels disabled: {}", e);
                None
            }
        };

        Self {
            font,
            font_size: LABEL_FONT_SIZE,
        }
    }

    /// 只画框，不渲染标签
    pub fn boxes_only() -> Self {
        Self {
            font: None,
            font_size: LABEL_FONT_SIZE,
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// 从字体文件加载
    pub fn from_font_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            VisionError::Config(format!("Failed to read font {}: {}", path.display(), e))
        })?;
        let font = FontArc::try_from_vec(data).map_err(|e| {
            VisionError::Config(format!("Invalid font file {}: {}", path.display(), e))
        })?;

        tracing::info!("Annotation font loaded from {}", path.display());
        Ok(Self::new().with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 绘制所有检测框，返回新图像
    pub fn draw(&self, source: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = source.clone();
        for det in detections {
            self.draw_detection(&mut canvas, det);
        }
        canvas
    }

    /// 绘制并编码为 JPEG
    pub fn annotate(&self, source: &RgbImage, detections: &[Detection]) -> Result<Vec<u8>> {
        let canvas = self.draw(source, detections);
        encode_jpeg(canvas)
    }

    fn draw_detection(&self, canvas: &mut RgbImage, det: &Detection) {
        let (width, height) = canvas.dimensions();
        let bbox = det.bbox;

        // 框坐标允许等于宽高，绘制时收进图像内
        let x1 = bbox.x1.min(width.saturating_sub(1));
        let y1 = bbox.y1.min(height.saturating_sub(1));
        let x2 = bbox.x2.min(width.saturating_sub(1));
        let y2 = bbox.y2.min(height.saturating_sub(1));

        for t in 0..BOX_THICKNESS {
            let (left, top) = (x1 + t, y1 + t);
            let (right, bottom) = (x2.saturating_sub(t), y2.saturating_sub(t));
            if right < left || bottom < top {
                break;
            }
            let rect = Rect::at(left as i32, top as i32).of_size(right - left + 1, bottom - top + 1);
            draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
        }

        let Some(font) = &self.font else {
            return;
        };

        let label = format!("{}: {:.2}", det.class_name, det.confidence);
        let scale = PxScale::from(self.font_size);
        let (text_w, text_h) = text_size(scale, font, &label);
        if text_w == 0 || text_h == 0 {
            return;
        }

        let label_h = text_h + LABEL_PADDING * 2;
        let label_w = (text_w + LABEL_PADDING * 2).min(width - x1);
        // 框上方放不下时画在框内
        let label_y = if y1 >= label_h { y1 - label_h } else { y1 };

        let background = Rect::at(x1 as i32, label_y as i32).of_size(label_w, label_h);
        draw_filled_rect_mut(canvas, background, BOX_COLOR);
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            (x1 + LABEL_PADDING) as i32,
            (label_y + LABEL_PADDING) as i32,
            scale,
            font,
            &label,
        );
    }
}

/// RGB 图像编码为 JPEG
pub fn encode_jpeg(image: RgbImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|e| VisionError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}
