use crate::image::preprocessing::PreprocessedImage;
use crate::models::classifier::{argmax, top_k};
use crate::models::{ModelEntry, ModelFamily, RawBox, RawPrediction};
use crate::utils::error::VisionError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 分类结果保留的候选数
pub const TOP_K: usize = 3;

/// 原图像素坐标系中的检测框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// 分类候选
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub class_name: String,
    pub class_id: usize,
    pub confidence: f32,
}

/// 一次推理的完整结果
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub family: ModelFamily,
    /// 检测器输出，保持模型原始顺序
    pub detections: Vec<Detection>,
    /// 绘制了检测框的 JPEG
    pub annotated_image: Option<Vec<u8>>,
    pub primary_class: Option<String>,
    pub primary_confidence: Option<f32>,
    pub top_classes: Vec<ClassScore>,
    pub is_relevant: bool,
    /// 由流水线填写
    pub timings: StageTimings,
}

/// 各阶段耗时
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
    pub total: Duration,
}

impl DetectionResult {
    pub fn num_detections(&self) -> usize {
        self.detections.len()
    }
}

/// 后处理：检测框映射回原图并过滤，分类取 top-k
pub struct Postprocessor;

impl Postprocessor {
    pub fn postprocess(raw: &RawPrediction, pre: &PreprocessedImage, entry: &ModelEntry) -> Result<DetectionResult> {
        match (entry.family, raw) {
            (ModelFamily::Detector, RawPrediction::Detection { boxes }) => {
                let detections = Self::reproject(boxes, pre, entry)?;
                tracing::debug!(
                    "Model '{}': {} of {} box(es) kept at threshold {}",
                    entry.name,
                    detections.len(),
                    boxes.len(),
                    entry.confidence_threshold
                );
                Ok(DetectionResult {
                    family: ModelFamily::Detector,
                    detections,
                    annotated_image: None,
                    primary_class: None,
                    primary_confidence: None,
                    top_classes: Vec::new(),
                    is_relevant: false,
                    timings: StageTimings::default(),
                })
            }
            (ModelFamily::Classifier, RawPrediction::Classification { probabilities }) => {
                Self::classify(probabilities, entry)
            }
            (family, raw) => Err(VisionError::inference(
                &entry.name,
                format!("{} model produced a {} prediction", family, raw.family()),
            )),
        }
    }

    fn reproject(boxes: &[RawBox], pre: &PreprocessedImage, entry: &ModelEntry) -> Result<Vec<Detection>> {
        let (sx, sy) = (pre.scale_x, pre.scale_y);
        if !(sx.is_finite() && sy.is_finite()) || sx == 0.0 || sy == 0.0 {
            return Err(VisionError::Geometry(format!(
                "invalid scale factors ({}, {})",
                sx, sy
            )));
        }

        let (width, height) = pre.source_size;
        let clamp_x = |v: f64| v.trunc().clamp(0.0, width as f64) as u32;
        let clamp_y = |v: f64| v.trunc().clamp(0.0, height as f64) as u32;

        let mut detections = Vec::with_capacity(boxes.len());
        for raw in boxes {
            if raw.score.is_nan() || raw.score < entry.confidence_threshold {
                continue;
            }

            let x1 = clamp_x(raw.x1 as f64 / sx);
            let y1 = clamp_y(raw.y1 as f64 / sy);
            let x2 = clamp_x(raw.x2 as f64 / sx);
            let y2 = clamp_y(raw.y2 as f64 / sy);

            detections.push(Detection {
                class_name: entry.class_name(raw.class_id),
                confidence: raw.score,
                bbox: BoundingBox {
                    x1: x1.min(x2),
                    y1: y1.min(y2),
                    x2: x1.max(x2),
                    y2: y1.max(y2),
                },
            });
        }

        Ok(detections)
    }

    fn classify(probabilities: &[f32], entry: &ModelEntry) -> Result<DetectionResult> {
        let (primary_id, primary_confidence) = argmax(probabilities)
            .ok_or_else(|| VisionError::inference(&entry.name, "empty probability vector"))?;

        let top_classes = top_k(probabilities, TOP_K.min(entry.labels.len().max(1)))
            .into_iter()
            .map(|(class_id, confidence)| ClassScore {
                class_name: entry.class_name(class_id),
                class_id,
                confidence,
            })
            .collect();

        Ok(DetectionResult {
            family: ModelFamily::Classifier,
            detections: Vec::new(),
            annotated_image: None,
            primary_class: Some(entry.class_name(primary_id)),
            primary_confidence: Some(primary_confidence),
            top_classes,
            is_relevant: primary_confidence > entry.acceptance_threshold,
            timings: StageTimings::default(),
        })
    }
}
