use crate::config::{ModelSpec, ModelsConfig};
use crate::models::{
    Device, DevicePreference, LoadRequest, ModelEntry, ModelFamily, ModelLoader, ORCHID_SPECIES,
};
use crate::utils::error::VisionError;
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// 项目名到已加载模型的映射。
///
/// 启动时构建一次，之后只读：`lookup` 不需要任何锁，
/// 通过 `Arc<ModelRegistry>` 在请求之间共享。
pub struct ModelRegistry {
    entries: HashMap<String, ModelEntry>,
}

impl ModelRegistry {
    /// 根据配置加载所有模型，单个模型失败只记录日志并跳过
    pub fn initialize(config: &ModelsConfig, loader: &dyn ModelLoader) -> Result<Self> {
        tracing::info!(
            "Initializing model registry with {} configured model(s)...",
            config.models.len()
        );

        let mut entries = HashMap::with_capacity(config.models.len());

        for (project_name, spec) in &config.models {
            match Self::load_entry(project_name, spec, loader) {
                Ok(entry) => {
                    tracing::info!(
                        "Model '{}' ({}, {}) initialized on {}",
                        project_name,
                        spec.model_name,
                        entry.family,
                        entry.device
                    );
                    entries.insert(project_name.clone(), entry);
                }
                Err(e) => {
                    // 继续加载其他模型，不中断整个初始化过程
                    tracing::error!("Skipping model '{}': {}", project_name, e);
                }
            }
        }

        if entries.is_empty() {
            tracing::error!("No models were successfully initialized");
            return Err(VisionError::NoModelsAvailable {
                attempted: config.models.len(),
            });
        }

        let registry = Self { entries };
        tracing::info!(
            "Successfully initialized {} model(s): {:?}",
            registry.len(),
            registry.names()
        );
        Ok(registry)
    }

    /// 由已构造好的条目直接建立注册表
    pub fn from_entries(entries: Vec<ModelEntry>) -> Result<Self> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.contains_key(&entry.name) {
                return Err(VisionError::Config(format!(
                    "Duplicate model name: {}",
                    entry.name
                )));
            }
            map.insert(entry.name.clone(), entry);
        }

        if map.is_empty() {
            return Err(VisionError::NoModelsAvailable { attempted: 0 });
        }

        Ok(Self { entries: map })
    }

    pub fn lookup(&self, name: &str) -> Result<&ModelEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| VisionError::ModelNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// 已加载的项目名（排序后）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let models = self
            .names()
            .into_iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| ModelInfo {
                name: entry.name.clone(),
                family: entry.family,
                device: entry.device,
                input_size: [entry.input_size.0, entry.input_size.1],
                confidence_threshold: entry.confidence_threshold,
                labels: entry.labels.clone(),
            })
            .collect();

        RegistryStats {
            model_count: self.len(),
            models,
        }
    }

    fn load_entry(project_name: &str, spec: &ModelSpec, loader: &dyn ModelLoader) -> Result<ModelEntry> {
        let model_path = spec
            .model_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| VisionError::model_load(project_name, "model_path not configured"))?;

        let family = spec.resolve_family();

        let (width, height) = spec
            .input_size
            .map(|[w, h]| (w, h))
            .unwrap_or_else(|| family.default_input_size());
        if width == 0 || height == 0 {
            return Err(VisionError::model_load(
                project_name,
                format!("invalid input size {}x{}", width, height),
            ));
        }

        for (key, value) in [
            ("confidence_threshold", spec.confidence_threshold),
            ("acceptance_threshold", spec.acceptance_threshold),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(VisionError::model_load(
                        project_name,
                        format!("{key} must be within [0, 1], got {v}"),
                    ));
                }
            }
        }

        let configured_labels = Self::configured_labels(project_name, spec)?;
        let device = Self::resolve_device(project_name, spec.device, loader);

        tracing::info!("Initializing model '{}' ({})", project_name, spec.model_name);

        let backend = loader
            .load(&LoadRequest {
                name: project_name,
                model_path,
                family,
                device,
            })
            .map_err(|e| match e {
                VisionError::ModelLoad { .. } => e,
                other => VisionError::model_load(project_name, other),
            })?;

        let labels = match configured_labels {
            Some(labels) => labels,
            None => Self::default_labels(project_name, family, backend.labels()),
        };

        let mut entry = ModelEntry::new(project_name, family, backend)
            .with_input_size(width, height)
            .with_labels(labels)
            .with_device(device)
            .with_channel_order(spec.channel_order.unwrap_or_default());

        if let Some(threshold) = spec.confidence_threshold {
            entry = entry.with_confidence_threshold(threshold);
        }
        if let Some(threshold) = spec.acceptance_threshold {
            entry = entry.with_acceptance_threshold(threshold);
        }

        Ok(entry)
    }

    fn resolve_device(project_name: &str, preference: DevicePreference, loader: &dyn ModelLoader) -> Device {
        match preference {
            DevicePreference::Cpu => {
                tracing::info!("Model '{}': CPU pinned by configuration", project_name);
                Device::Cpu
            }
            DevicePreference::Auto if loader.accelerator_available() => {
                tracing::info!("Model '{}': using accelerator", project_name);
                Device::Accelerator
            }
            DevicePreference::Auto => {
                tracing::info!("Model '{}': accelerator unavailable, using CPU", project_name);
                Device::Cpu
            }
        }
    }

    /// 配置文件中显式给出的类别名，优先级最高
    fn configured_labels(project_name: &str, spec: &ModelSpec) -> Result<Option<Vec<String>>> {
        if let Some(labels) = &spec.labels {
            return Ok(Some(labels.clone()));
        }

        match &spec.labels_path {
            Some(path) => read_labels(path)
                .map(Some)
                .map_err(|e| VisionError::model_load(project_name, e)),
            None => Ok(None),
        }
    }

    /// 未配置时使用模型自带的类别表，再退回到按类型的默认值
    fn default_labels(
        project_name: &str,
        family: ModelFamily,
        model_labels: Option<Vec<String>>,
    ) -> Vec<String> {
        if let Some(labels) = model_labels.filter(|labels| !labels.is_empty()) {
            tracing::info!(
                "Model '{}': using {} class name(s) from model metadata",
                project_name,
                labels.len()
            );
            return labels;
        }

        match family {
            ModelFamily::Classifier => ORCHID_SPECIES.iter().map(|s| s.to_string()).collect(),
            ModelFamily::Detector => {
                tracing::warn!(
                    "Model '{}': no class names available, detections will be reported as class_<id>",
                    project_name
                );
                Vec::new()
            }
        }
    }
}

/// 读取标签文件，每行一个类别名，忽略空行
fn read_labels(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        VisionError::Config(format!("Failed to read labels {}: {}", path.display(), e))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// 注册表统计信息
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub model_count: usize,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub family: ModelFamily,
    pub device: Device,
    pub input_size: [u32; 2],
    pub confidence_threshold: f32,
    pub labels: Vec<String>,
}
