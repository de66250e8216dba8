pub mod extractors;
pub mod handlers;
pub mod middleware;

use crate::{
    config::ModelsConfig,
    detection::InferencePipeline,
    image::{Annotator, DirectorySink},
    models::{ModelRegistry, OrtLoader},
    utils::error::VisionError,
    Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    middleware::from_fn,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

/// 请求处理器共享的状态
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<InferencePipeline>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pipeline: InferencePipeline, config: Config) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
        }
    }
}

/// 加载模型配置并初始化注册表，任何错误都应终止启动
pub fn build_state(config: &Config) -> Result<AppState> {
    let models_config = ModelsConfig::load_from_file(&config.models_config)?;

    let loader = OrtLoader::new(&config.onnx_config);
    let registry = ModelRegistry::initialize(&models_config, &loader)?;

    let annotator = match &config.font_path {
        Some(path) => Annotator::from_font_path(path)?,
        None => Annotator::new(),
    };

    let mut pipeline = InferencePipeline::new(Arc::new(registry), Arc::new(annotator));
    if let Some(dir) = models_config.save_path() {
        pipeline = pipeline.with_image_sink(Arc::new(DirectorySink::new(dir)?));
    }

    Ok(AppState::new(pipeline, config.clone()))
}

pub async fn serve(state: AppState) -> Result<()> {
    let config = state.config.clone();

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        VisionError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    let app = create_app(state);

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /api/v1/detectImage  - Multipart upload (imageFile, detectType)");
    tracing::info!("  POST /api/v1/detect       - JSON base64 upload");
    tracing::info!("  POST /api/v1/detect/batch - Multipart batch upload (files, detectType)");
    tracing::info!("  GET  /api/v1/models       - Loaded models");
    tracing::info!("  GET  /health              - Health check");
    tracing::info!("  GET  /api/info            - Service information");

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| VisionError::Internal(format!("Failed to bind to address {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| VisionError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub fn create_app(state: AppState) -> Router {
    let server_config = &state.config.server_config;
    let body_limit = server_config.max_request_size;
    let timeout = Duration::from_secs(server_config.request_timeout);

    let api = Router::new()
        .route("/detectImage", post(handlers::detect_image_handler))
        .route("/detect", post(handlers::detect_json_handler))
        .route("/detect/batch", post(handlers::detect_batch_handler))
        .route("/models", get(handlers::models_handler))
        .route("/hello", get(handlers::hello_handler));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        // multipart 默认只允许 2MB
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(from_fn(middleware::security_headers))
        .layer(from_fn(middleware::request_logging))
        .with_state(state)
}

/// 健康检查端点
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "models": state.pipeline.registry().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 服务信息端点
async fn info_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.pipeline.registry().stats();
    Json(json!({
        "service": "Orchid Vision Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "models": stats,
        "limits": {
            "max_upload_bytes": crate::config::MAX_UPLOAD_SIZE,
            "request_timeout_secs": state.config.server_config.request_timeout
        },
        "features": {
            "batch_processing": true,
            "annotated_images": true,
            "debug_image_sink": state.pipeline.has_image_sink()
        }
    }))
}
