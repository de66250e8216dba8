use crate::image::preprocessing::PreprocessedImage;
use crate::models::{classifier, detector, ModelEntry, ModelFamily};
use crate::utils::error::VisionError;
use crate::Result;
use ndarray::ArrayD;
use std::time::Instant;

/// 模型空间中的一个检测框（尚未映射回原图）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
}

/// 模型原始输出，按模型族区分
#[derive(Debug, Clone, PartialEq)]
pub enum RawPrediction {
    Classification { probabilities: Vec<f32> },
    Detection { boxes: Vec<RawBox> },
}

impl RawPrediction {
    pub fn family(&self) -> ModelFamily {
        match self {
            RawPrediction::Classification { .. } => ModelFamily::Classifier,
            RawPrediction::Detection { .. } => ModelFamily::Detector,
        }
    }
}

/// 输出解码函数：将后端返回的原始张量转换为 RawPrediction
pub type Decoder = fn(&ModelEntry, Vec<ArrayD<f32>>) -> Result<RawPrediction>;

/// 按模型族选择解码器
pub fn decoder(family: ModelFamily) -> Decoder {
    match family {
        ModelFamily::Classifier => classifier::decode,
        ModelFamily::Detector => detector::decode,
    }
}

/// 推理分发器：调用后端并按模型族解析输出
pub struct InferenceDispatcher;

impl InferenceDispatcher {
    pub fn run(entry: &ModelEntry, input: &PreprocessedImage) -> Result<RawPrediction> {
        let (width, height) = entry.input_size;
        let expected = [1, 3, height as usize, width as usize];
        if input.tensor.shape() != expected {
            return Err(VisionError::inference(
                &entry.name,
                format!(
                    "input tensor shape {:?} does not match model input {:?}",
                    input.tensor.shape(),
                    expected
                ),
            ));
        }

        let start = Instant::now();
        let outputs = entry
            .backend
            .forward(&input.tensor)
            .map_err(|e| wrap(&entry.name, e))?;
        tracing::debug!(
            "Model '{}' forward pass took {:.2?}, {} output(s)",
            entry.name,
            start.elapsed(),
            outputs.len()
        );

        if outputs.is_empty() {
            return Err(VisionError::inference(&entry.name, "model returned no outputs"));
        }

        decoder(entry.family)(entry, outputs).map_err(|e| wrap(&entry.name, e))
    }
}

fn wrap(model: &str, err: VisionError) -> VisionError {
    match err {
        VisionError::Inference { .. } => err,
        other => VisionError::inference(model, other),
    }
}
