//! 单元测试共用的假后端与加载器

use crate::models::{InferenceBackend, LoadRequest, ModelLoader};
use crate::utils::error::VisionError;
use crate::Result;
use ndarray::{Array4, ArrayD, IxDyn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 每次返回同一组输出张量
pub struct FixedBackend {
    outputs: Vec<ArrayD<f32>>,
    labels: Option<Vec<String>>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedBackend {
    pub fn new(outputs: Vec<ArrayD<f32>>) -> Self {
        Self {
            outputs,
            labels: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 模拟模型元数据里的类别名
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// 分类器输出 [1, C]
    pub fn logits(values: &[f32]) -> Self {
        let array = ArrayD::from_shape_vec(IxDyn(&[1, values.len()]), values.to_vec())
            .expect("valid logits shape");
        Self::new(vec![array])
    }

    /// 端到端检测输出 [1, N, 6]
    pub fn end_to_end(rows: &[[f32; 6]]) -> Self {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let array = ArrayD::from_shape_vec(IxDyn(&[1, rows.len(), 6]), flat)
            .expect("valid detection shape");
        Self::new(vec![array])
    }
}

impl InferenceBackend for FixedBackend {
    fn forward(&self, _input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outputs.clone())
    }

    fn labels(&self) -> Option<Vec<String>> {
        self.labels.clone()
    }
}

/// 总是推理失败
pub struct FailingBackend;

impl InferenceBackend for FailingBackend {
    fn forward(&self, _input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        Err(VisionError::Internal("device lost".to_string()))
    }
}

/// 路径中包含 "missing" 的模型加载失败，其余返回分类器 logits 后端
pub struct FakeLoader {
    pub accelerator: bool,
}

impl ModelLoader for FakeLoader {
    fn accelerator_available(&self) -> bool {
        self.accelerator
    }

    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceBackend>> {
        if request.model_path.to_string_lossy().contains("missing") {
            return Err(VisionError::model_load(
                request.name,
                format!("model file not found: {}", request.model_path.display()),
            ));
        }
        Ok(Box::new(FixedBackend::logits(&[0.0; 8])))
    }
}
