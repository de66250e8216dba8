use crate::models::backend::InferenceBackend;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 默认兰花品种标签（分类器）
pub const ORCHID_SPECIES: [&str; 8] = [
    "Phalaenopsis",
    "Dendrobium",
    "Cattleya",
    "Cymbidium",
    "Oncidium",
    "Vanda",
    "Paphiopedilum",
    "Unknown",
];

/// 检测框置信度过滤的默认门限
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// 分类结果判定为“相关”的默认门限
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.3;

/// 模型族：决定调用约定与输出解析方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Classifier,
    Detector,
}

impl ModelFamily {
    /// 按模型名推断，yolo 系列为检测器
    pub fn from_model_name(model_name: &str) -> Self {
        if model_name.trim().to_ascii_lowercase().starts_with("yolo") {
            ModelFamily::Detector
        } else {
            ModelFamily::Classifier
        }
    }

    /// (width, height)
    pub fn default_input_size(self) -> (u32, u32) {
        match self {
            ModelFamily::Classifier => (224, 224),
            ModelFamily::Detector => (640, 640),
        }
    }

    /// 分类器使用 ImageNet 均值方差归一化，检测器只缩放到 [0,1]
    pub fn default_normalization(self) -> Option<Normalization> {
        match self {
            ModelFamily::Classifier => Some(Normalization::IMAGENET),
            ModelFamily::Detector => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Classifier => "classifier",
            ModelFamily::Detector => "detector",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 实际运行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Accelerator,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Accelerator => f.write_str("accelerator"),
        }
    }
}

/// 配置中的设备偏好
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// 有加速器则用加速器，否则 CPU
    #[default]
    Auto,
    Cpu,
}

/// 模型期望的输入通道顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// 按模型输入通道顺序给出的均值/方差
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };
}

/// 注册表中的一个已加载模型，加载完成后不可变
pub struct ModelEntry {
    pub name: String,
    pub family: ModelFamily,
    pub backend: Box<dyn InferenceBackend>,
    pub device: Device,
    /// (width, height)
    pub input_size: (u32, u32),
    pub confidence_threshold: f32,
    pub acceptance_threshold: f32,
    pub labels: Vec<String>,
    pub channel_order: ChannelOrder,
    pub normalization: Option<Normalization>,
}

impl ModelEntry {
    /// 以模型族默认值构造
    pub fn new(name: impl Into<String>, family: ModelFamily, backend: Box<dyn InferenceBackend>) -> Self {
        let labels = match family {
            ModelFamily::Classifier => ORCHID_SPECIES.iter().map(|s| s.to_string()).collect(),
            ModelFamily::Detector => Vec::new(),
        };

        Self {
            name: name.into(),
            family,
            backend,
            device: Device::Cpu,
            input_size: family.default_input_size(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            labels,
            channel_order: ChannelOrder::Rgb,
            normalization: family.default_normalization(),
        }
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width, height);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_acceptance_threshold(mut self, threshold: f32) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }

    /// 类别 id 对应的名称，标签表缺失时退化为 `class_{id}`
    pub fn class_name(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("device", &self.device)
            .field("input_size", &self.input_size)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("acceptance_threshold", &self.acceptance_threshold)
            .field("labels", &self.labels.len())
            .finish()
    }
}
