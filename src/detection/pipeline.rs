use crate::detection::aggregate::ResultAggregator;
use crate::detection::types::{PipelineOptions, ResponsePayload};
use crate::image::{
    Annotator, DetectionResult, ImageLoader, ImageSink, Postprocessor, Preprocessor, StageTimings,
};
use crate::models::{InferenceDispatcher, ModelFamily, ModelRegistry};
use crate::Result;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;

/// 推理流水线：查找模型 → 预处理 → 推理 → 后处理 → 标注
///
/// 每次调用都是一个完整的同步工作单元，web 层负责把它放到阻塞线程池中执行。
#[derive(Clone)]
pub struct InferencePipeline {
    registry: Arc<ModelRegistry>,
    annotator: Arc<Annotator>,
    sink: Option<Arc<dyn ImageSink>>,
    options: PipelineOptions,
}

impl InferencePipeline {
    pub fn new(registry: Arc<ModelRegistry>, annotator: Arc<Annotator>) -> Self {
        Self {
            registry,
            annotator,
            sink: None,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_image_sink(mut self, sink: Arc<dyn ImageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn has_image_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// 对已解码的图像执行一次推理
    pub fn detect(&self, image: &DynamicImage, project: &str) -> Result<DetectionResult> {
        let start = Instant::now();

        // 先确定模型存在，再做其他工作
        let entry = self.registry.lookup(project)?;

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.save(image) {
                tracing::warn!("Failed to save debug image: {}", e);
            }
        }

        let preprocess_start = Instant::now();
        let rgb = image.to_rgb8();
        let pre = Preprocessor::for_entry(entry).preprocess(&rgb)?;
        let preprocess_time = preprocess_start.elapsed();

        let inference_start = Instant::now();
        let raw = InferenceDispatcher::run(entry, &pre)?;
        let inference_time = inference_start.elapsed();

        let postprocess_start = Instant::now();
        let mut result = Postprocessor::postprocess(&raw, &pre, entry)?;

        if entry.family == ModelFamily::Detector && self.options.annotate {
            result.annotated_image = Some(self.annotator.annotate(&rgb, &result.detections)?);
        }
        let postprocess_time = postprocess_start.elapsed();

        result.timings = StageTimings {
            preprocess: preprocess_time,
            inference: inference_time,
            postprocess: postprocess_time,
            total: start.elapsed(),
        };

        tracing::info!(
            "Project '{}' ({}) processed {}x{} image in {:.2?} (preprocess {:.2?}, inference {:.2?}, postprocess {:.2?}), {} detection(s)",
            project,
            entry.family,
            pre.source_size.0,
            pre.source_size.1,
            result.timings.total,
            preprocess_time,
            inference_time,
            postprocess_time,
            result.num_detections()
        );

        Ok(result)
    }

    pub fn process_image(&self, image: &DynamicImage, project: &str) -> Result<ResponsePayload> {
        let result = self.detect(image, project)?;
        ResultAggregator::aggregate(result)
    }

    pub fn process_bytes(&self, bytes: &[u8], project: &str) -> Result<ResponsePayload> {
        // 模型不存在时不必解码
        self.registry.lookup(project)?;
        let image = ImageLoader::from_bytes(bytes)?;
        self.process_image(&image, project)
    }

    pub fn process_base64(&self, data: &str, project: &str) -> Result<ResponsePayload> {
        self.registry.lookup(project)?;
        let image = ImageLoader::from_base64(data)?;
        self.process_image(&image, project)
    }

    /// 批量处理，单张失败不影响其他图片
    pub fn process_batch(&self, images: &[Vec<u8>], project: &str) -> Vec<Result<ResponsePayload>> {
        tracing::info!("Batch of {} image(s) for project '{}'", images.len(), project);
        images
            .iter()
            .map(|bytes| self.process_bytes(bytes, project))
            .collect()
    }
}
