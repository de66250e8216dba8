use crate::image::BoundingBox;
use serde::{Deserialize, Serialize};

/// 流水线处理选项
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PipelineOptions {
    /// 检测器结果是否附带标注图
    #[serde(default = "default_annotate")]
    pub annotate: bool,
}

fn default_annotate() -> bool {
    true
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            annotate: default_annotate(),
        }
    }
}

/// 响应中的单个检测框
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// 分类候选
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesPrediction {
    pub species: String,
    pub confidence: f32,
}

/// 一次请求的响应负载，检测与分类两种形态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Detection {
        detections: Vec<DetectionRecord>,
        num_detections: usize,
        /// base64 编码的标注 JPEG
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },
    Classification {
        primary_species: String,
        confidence: f32,
        all_predictions: Vec<SpeciesPrediction>,
        is_orchid: bool,
    },
}

impl ResponsePayload {
    pub fn num_detections(&self) -> usize {
        match self {
            ResponsePayload::Detection { num_detections, .. } => *num_detections,
            ResponsePayload::Classification { .. } => 0,
        }
    }
}
