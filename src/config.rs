use crate::models::{ChannelOrder, DevicePreference, ModelFamily};
use crate::utils::error::VisionError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 上传文件大小上限（10MB）
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 模型配置文件路径（TOML 或 JSON）
    pub models_config: PathBuf,

    /// 工作线程数量
    pub workers: usize,

    /// 开发模式
    pub dev_mode: bool,

    /// 标注文字使用的 TTF 字体
    pub font_path: Option<PathBuf>,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 优化级别
    pub optimization_level: u8,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,
}

impl Config {
    pub fn new(
        bind_addr: String,
        models_config: impl Into<PathBuf>,
        workers: Option<usize>,
        font_path: Option<PathBuf>,
        dev_mode: bool,
    ) -> Result<Self> {
        let cpu_cores = num_cpus::get();
        let workers = workers.unwrap_or(cpu_cores);
        if workers == 0 {
            return Err(VisionError::Config("workers must be at least 1".to_string()));
        }

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores * 3 / 4).max(1),
            optimization_level: 3,
        };

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 },
            // multipart 包装开销留一点余量
            max_request_size: MAX_UPLOAD_SIZE + 64 * 1024,
        };

        Ok(Self {
            bind_addr,
            models_config: models_config.into(),
            workers,
            dev_mode,
            font_path,
            onnx_config,
            server_config,
        })
    }
}

/// 模型配置文件的内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// 项目名 -> 模型描述
    pub models: BTreeMap<String, ModelSpec>,

    /// 调试用图像保存设置
    #[serde(default)]
    pub images: Option<ImagesConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    pub save_path: PathBuf,
}

/// 单个模型的配置项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_path: Option<PathBuf>,

    /// 模型名称，如 "yolov11"、"resnet18"
    #[serde(default)]
    pub model_name: String,

    /// 未指定时由 model_name 推断
    #[serde(default)]
    pub family: Option<ModelFamily>,

    /// (width, height)
    #[serde(default)]
    pub input_size: Option<[u32; 2]>,

    #[serde(default)]
    pub confidence_threshold: Option<f32>,

    /// 分类器判定“相关”的门限，与检测置信度过滤互相独立
    #[serde(default)]
    pub acceptance_threshold: Option<f32>,

    #[serde(default)]
    pub labels: Option<Vec<String>>,

    /// 标签文件，每行一个类别名
    #[serde(default)]
    pub labels_path: Option<PathBuf>,

    #[serde(default)]
    pub device: DevicePreference,

    #[serde(default)]
    pub channel_order: Option<ChannelOrder>,
}

impl ModelSpec {
    /// 解析模型族：显式配置优先，否则按 model_name 推断
    pub fn resolve_family(&self) -> ModelFamily {
        self.family
            .unwrap_or_else(|| ModelFamily::from_model_name(&self.model_name))
    }
}

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// 根据扩展名判断格式
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl ModelsConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_extension(path).ok_or_else(|| {
            VisionError::Config(format!(
                "Unsupported config file extension: {}",
                path.display()
            ))
        })?;

        let content = std::fs::read_to_string(path).map_err(|e| {
            VisionError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::info!("Model config loaded from {}", path.display());
        Self::load_from_str(&content, format)
    }

    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| VisionError::Config(format!("Failed to parse TOML config: {e}"))),
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| VisionError::Config(format!("Failed to parse JSON config: {e}"))),
        }
    }

    pub fn save_path(&self) -> Option<&Path> {
        self.images.as_ref().map(|images| images.save_path.as_path())
    }
}
