use crate::config::OnnxConfig;
use crate::models::{Device, ModelFamily};
use crate::utils::error::VisionError;
use crate::Result;
use ndarray::{Array4, ArrayD};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use std::fmt::Display;
use std::path::Path;

/// 一次前向推理的最小抽象，输入为 NCHW 张量，输出按模型输出顺序返回
pub trait InferenceBackend: Send + Sync {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>>;

    /// 模型自带的类别名表（如 YOLO 导出时写入的 `names` 元数据）
    fn labels(&self) -> Option<Vec<String>> {
        None
    }
}

/// 加载单个模型所需的信息
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub name: &'a str,
    pub model_path: &'a Path,
    pub family: ModelFamily,
    pub device: Device,
}

/// 模型加载器：负责探测加速器并创建推理后端
pub trait ModelLoader: Send + Sync {
    fn accelerator_available(&self) -> bool;

    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceBackend>>;
}

/// ONNX Runtime 加载器
pub struct OrtLoader {
    intra_threads: usize,
    optimization_level: u8,
    accelerator: bool,
}

impl OrtLoader {
    pub fn new(onnx_config: &OnnxConfig) -> Self {
        // 只在启动时探测一次
        let accelerator = match CUDAExecutionProvider::default().is_available() {
            Ok(available) => available,
            Err(e) => {
                tracing::debug!("CUDA availability probe failed: {}", e);
                false
            }
        };

        if accelerator {
            tracing::info!("CUDA execution provider available");
        } else {
            tracing::info!("CUDA execution provider not available, models will run on CPU");
        }

        Self {
            intra_threads: onnx_config.intra_threads,
            optimization_level: onnx_config.optimization_level,
            accelerator,
        }
    }
}

impl ModelLoader for OrtLoader {
    fn accelerator_available(&self) -> bool {
        self.accelerator
    }

    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceBackend>> {
        let backend = OrtBackend::load(
            request.name,
            request.model_path,
            request.device,
            self.intra_threads,
            self.optimization_level,
        )?;
        Ok(Box::new(backend))
    }
}

fn load_err<E: Display>(name: &str) -> impl FnOnce(E) -> VisionError + '_ {
    move |e| VisionError::model_load(name, e)
}

fn optimization_level(level: u8) -> GraphOptimizationLevel {
    match level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

/// 基于 ort Session 的推理后端。
///
/// `Session::run` 需要独占访问，因此每个模型持有自己的锁：
/// 同一模型上的并发请求串行执行，不同模型之间互不阻塞。
pub struct OrtBackend {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    output_names: Vec<String>,
    labels: Option<Vec<String>>,
}

impl OrtBackend {
    pub fn load(
        name: &str,
        model_path: &Path,
        device: Device,
        intra_threads: usize,
        optimization: u8,
    ) -> Result<Self> {
        if !model_path.exists() {
            return Err(VisionError::model_load(
                name,
                format!("model file not found: {}", model_path.display()),
            ));
        }

        tracing::info!("Loading model '{}' from: {}", name, model_path.display());

        let mut builder = Session::builder()
            .map_err(load_err(name))?
            .with_optimization_level(optimization_level(optimization))
            .map_err(load_err(name))?
            .with_intra_threads(intra_threads)
            .map_err(load_err(name))?;

        if device == Device::Accelerator {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .build()
                    .error_on_failure()])
                .map_err(load_err(name))?;
        }

        let session = builder
            .commit_from_file(model_path)
            .map_err(load_err(name))?;

        let input_name = match session.inputs.first() {
            Some(input) => input.name.clone(),
            None => return Err(VisionError::model_load(name, "model has no inputs")),
        };

        if session.outputs.is_empty() {
            return Err(VisionError::model_load(name, "model has no outputs"));
        }
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        tracing::info!(
            "Model '{}' input: '{}', outputs: {:?}",
            name,
            input_name,
            output_names
        );

        let labels = Self::metadata_labels(name, &session);

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_names,
            labels,
        })
    }

    /// 读取 `names` 自定义元数据，缺失或无法解析时返回 None
    fn metadata_labels(name: &str, session: &Session) -> Option<Vec<String>> {
        let metadata = match session.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("Model '{}' has no readable metadata: {}", name, e);
                return None;
            }
        };

        let raw = match metadata.custom("names") {
            Ok(Some(raw)) => raw,
            _ => return None,
        };

        let labels = parse_names(&raw);
        match &labels {
            Some(labels) => {
                tracing::info!("Model '{}' carries {} class name(s) in metadata", name, labels.len())
            }
            None => tracing::warn!("Model '{}' has unparsable names metadata: {}", name, raw),
        }
        labels
    }
}

/// 解析 `{0: 'person', 1: 'bicycle'}` 形式的类别表。
///
/// 缺失的编号用 `class_{id}` 补齐，保证下标与类别编号一致。
pub fn parse_names(raw: &str) -> Option<Vec<String>> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut names: Vec<(usize, String)> = Vec::new();
    let mut rest = body.trim_start();

    while !rest.is_empty() {
        let (key, after_key) = rest.split_once(':')?;
        let id: usize = key.trim().parse().ok()?;

        let value = after_key.trim_start();
        let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
        let value = &value[1..];
        let end = value.find(quote)?;
        names.push((id, value[..end].to_string()));

        rest = value[end + 1..].trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    let size = names.iter().map(|(id, _)| id + 1).max()?;
    let mut labels: Vec<String> = (0..size).map(|id| format!("class_{id}")).collect();
    for (id, name) in names {
        labels[id] = name;
    }
    Some(labels)
}

impl InferenceBackend for OrtBackend {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let input_tensor =
            Tensor::from_array(input.clone()).map_err(|e| VisionError::inference(&self.name, e))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| VisionError::inference(&self.name, e))?;

        let mut arrays = Vec::with_capacity(self.output_names.len());
        for output_name in &self.output_names {
            match outputs.get(output_name.as_str()) {
                Some(output) => {
                    let array = output
                        .try_extract_array::<f32>()
                        .map_err(|e| VisionError::inference(&self.name, e))?
                        .into_owned();
                    arrays.push(array);
                }
                None => {
                    let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                    return Err(VisionError::inference(
                        &self.name,
                        format!(
                            "output '{}' not found, available outputs: {:?}",
                            output_name, available
                        ),
                    ));
                }
            }
        }

        Ok(arrays)
    }

    fn labels(&self) -> Option<Vec<String>> {
        self.labels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_model_load_error() {
        let result = OrtBackend::load(
            "ghost",
            Path::new("/nonexistent/ghost.onnx"),
            Device::Cpu,
            1,
            3,
        );
        match result {
            Err(VisionError::ModelLoad { name, .. }) => assert_eq!(name, "ghost"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loading a missing file must fail"),
        }
    }

    #[test]
    fn parse_ultralytics_names() {
        let labels = parse_names("{0: 'black_rot', 1: 'leaf_spot', 2: \"healthy\"}").unwrap();
        assert_eq!(labels, vec!["black_rot", "leaf_spot", "healthy"]);

        // 名字里带逗号和冒号
        let labels = parse_names("{0: 'a, b', 1: 'c: d'}").unwrap();
        assert_eq!(labels, vec!["a, b", "c: d"]);
    }

    #[test]
    fn parse_names_fills_gaps() {
        let labels = parse_names("{2: 'rust', 0: 'healthy'}").unwrap();
        assert_eq!(labels, vec!["healthy", "class_1", "rust"]);
    }

    #[test]
    fn parse_names_rejects_malformed() {
        assert!(parse_names("").is_none());
        assert!(parse_names("{}").is_none());
        assert!(parse_names("['a', 'b']").is_none());
        assert!(parse_names("{x: 'a'}").is_none());
        assert!(parse_names("{0: 'unterminated}").is_none());
    }

    #[test]
    fn optimization_level_mapping() {
        assert!(matches!(optimization_level(0), GraphOptimizationLevel::Disable));
        assert!(matches!(optimization_level(3), GraphOptimizationLevel::Level3));
        assert!(matches!(optimization_level(9), GraphOptimizationLevel::Level3));
    }
}
