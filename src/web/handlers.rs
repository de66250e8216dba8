use crate::{
    detection::ResponsePayload,
    models::RegistryStats,
    utils::error::VisionError,
    web::{
        extractors::{RequestId, ValidatedJson},
        AppState,
    },
    Result,
};
use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

/// JSON请求体（base64模式）
#[derive(Debug, Deserialize)]
pub struct DetectJsonRequest {
    /// Base64编码的图像数据，允许 data URL
    pub image: String,

    /// 项目名，对应已加载的模型
    pub project: String,
}

/// 单图上传的响应
#[derive(Debug, Serialize)]
pub struct DetectImageResponse {
    pub filename: Option<String>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

/// 批处理中单个文件的结果
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Success {
        filename: Option<String>,
        #[serde(flatten)]
        payload: ResponsePayload,
    },
    Failure {
        filename: Option<String>,
        error: &'static str,
        message: String,
    },
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub project: String,
    pub total: usize,
    pub succeeded: usize,
    pub results: Vec<BatchItem>,
}

/// 上传的一个文件
struct Upload {
    filename: Option<String>,
    data: Vec<u8>,
}

/// 在阻塞线程池中执行一次同步推理
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| VisionError::Internal(format!("Inference task failed: {}", e)))?
}

fn multipart_error(e: MultipartError) -> VisionError {
    VisionError::InvalidInput(format!("Failed to read multipart field: {}", e.body_text()))
}

async fn read_upload(field: Field<'_>) -> Result<Upload> {
    if let Some(content_type) = field.content_type() {
        if !content_type.starts_with("image/") && content_type != "application/octet-stream" {
            return Err(VisionError::UnsupportedFormat(content_type.to_string()));
        }
    }

    let filename = field.file_name().map(|s| s.to_string());
    let data = field.bytes().await.map_err(multipart_error)?;

    tracing::debug!(
        "Received file {}: {} bytes",
        filename.as_deref().unwrap_or("<unnamed>"),
        data.len()
    );

    Ok(Upload {
        filename,
        data: data.to_vec(),
    })
}

async fn read_text(field: Field<'_>) -> Result<String> {
    let value = field.text().await.map_err(multipart_error)?;
    Ok(value.trim().to_string())
}

fn require_project(project: Option<String>) -> Result<String> {
    project
        .filter(|p| !p.is_empty())
        .ok_or_else(|| VisionError::InvalidInput("detectType is required".to_string()))
}

/// 单图检测（multipart: imageFile + detectType）
pub async fn detect_image_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    mut multipart: Multipart,
) -> Result<Json<DetectImageResponse>> {
    let start_time = Instant::now();

    let mut upload: Option<Upload> = None;
    let mut project: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "imageFile" => upload = Some(read_upload(field).await?),
            "detectType" => project = Some(read_text(field).await?),
            _ => tracing::debug!("Ignoring unknown field: {}", field_name),
        }
    }

    let Upload { filename, data } =
        upload.ok_or_else(|| VisionError::InvalidInput("No imageFile provided".to_string()))?;
    let project = require_project(project)?;

    tracing::info!(
        "Processing detectImage request: request_id={}, project={}, file={:?}, size={} bytes",
        request_id,
        project,
        filename,
        data.len()
    );

    let pipeline = state.pipeline.clone();
    let task_project = project.clone();
    let payload = run_blocking(move || pipeline.process_bytes(&data, &task_project)).await?;

    tracing::info!(
        "detectImage completed: request_id={}, project={}, detections={}, time={:.3}s",
        request_id,
        project,
        payload.num_detections(),
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(DetectImageResponse { filename, payload }))
}

/// JSON base64 检测
pub async fn detect_json_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(request): ValidatedJson<DetectJsonRequest>,
) -> Result<Json<ResponsePayload>> {
    let start_time = Instant::now();
    let DetectJsonRequest { image, project } = request;

    tracing::info!(
        "Processing JSON detect request: request_id={}, project={}",
        request_id,
        project
    );

    let pipeline = state.pipeline.clone();
    let task_project = project.clone();
    let payload = run_blocking(move || pipeline.process_base64(&image, &task_project)).await?;

    tracing::info!(
        "JSON detect completed: request_id={}, project={}, detections={}, time={:.3}s",
        request_id,
        project,
        payload.num_detections(),
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(payload))
}

/// 批处理上传（multipart: 多个 files + detectType）
pub async fn detect_batch_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    mut multipart: Multipart,
) -> Result<Json<BatchResponse>> {
    let start_time = Instant::now();

    let mut uploads = Vec::new();
    let mut project: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "files" => uploads.push(read_upload(field).await?),
            "detectType" => project = Some(read_text(field).await?),
            _ => tracing::debug!("Ignoring unknown field: {}", field_name),
        }
    }

    let project = require_project(project)?;
    if uploads.is_empty() {
        return Err(VisionError::InvalidInput("No image files provided".to_string()));
    }

    // 模型不存在时整个批次直接失败
    state.pipeline.registry().lookup(&project)?;

    tracing::info!(
        "Processing batch request: request_id={}, project={}, files={}",
        request_id,
        project,
        uploads.len()
    );

    let (filenames, images): (Vec<Option<String>>, Vec<Vec<u8>>) =
        uploads.into_iter().map(|u| (u.filename, u.data)).unzip();

    let pipeline = state.pipeline.clone();
    let task_project = project.clone();
    let outcomes = run_blocking(move || Ok(pipeline.process_batch(&images, &task_project))).await?;

    let results: Vec<BatchItem> = filenames
        .into_iter()
        .zip(outcomes)
        .map(|(filename, outcome)| match outcome {
            Ok(payload) => BatchItem::Success { filename, payload },
            Err(e) => {
                tracing::warn!("Batch item {:?} failed: {}", filename, e);
                BatchItem::Failure {
                    filename,
                    error: e.error_code(),
                    message: e.to_string(),
                }
            }
        })
        .collect();

    let succeeded = results
        .iter()
        .filter(|r| matches!(r, BatchItem::Success { .. }))
        .count();

    tracing::info!(
        "Batch completed: request_id={}, files={}, succeeded={}, time={:.3}s",
        request_id,
        results.len(),
        succeeded,
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(BatchResponse {
        project,
        total: results.len(),
        succeeded,
        results,
    }))
}

/// 已加载模型列表
pub async fn models_handler(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.pipeline.registry().stats())
}

pub async fn hello_handler() -> Json<Value> {
    Json(json!({ "message": "Hello, World!" }))
}
