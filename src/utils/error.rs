use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load model '{name}': {message}")]
    ModelLoad { name: String, message: String },

    #[error("No models available: all {attempted} configured model(s) failed to load")]
    NoModelsAvailable { attempted: usize },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Inference failed for model '{model}': {message}")]
    Inference { model: String, message: String },

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0} bytes, max allowed: {1} bytes")]
    FileTooLarge(usize, usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Image encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl VisionError {
    pub fn model_load(name: &str, err: impl Display) -> Self {
        VisionError::ModelLoad {
            name: name.to_string(),
            message: err.to_string(),
        }
    }

    pub fn inference(model: &str, err: impl Display) -> Self {
        VisionError::Inference {
            model: model.to_string(),
            message: err.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            VisionError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            VisionError::InvalidImage(_)
            | VisionError::Decode(_)
            | VisionError::InvalidInput(_)
            | VisionError::Base64(_)
            | VisionError::Json(_) => StatusCode::BAD_REQUEST,
            VisionError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            VisionError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            VisionError::ModelLoad { .. } | VisionError::NoModelsAvailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            VisionError::Config(_) => "ConfigError",
            VisionError::ModelLoad { .. } => "ModelLoadError",
            VisionError::NoModelsAvailable { .. } => "NoModelsAvailableError",
            VisionError::ModelNotFound(_) => "ModelNotFoundError",
            VisionError::InvalidImage(_) => "InvalidImageError",
            VisionError::Decode(_) | VisionError::Base64(_) => "DecodeError",
            VisionError::Inference { .. } => "InferenceError",
            VisionError::Geometry(_) => "GeometryError",
            VisionError::InvalidInput(_) | VisionError::Json(_) => "InvalidInputError",
            VisionError::FileTooLarge(_, _) => "FileTooLargeError",
            VisionError::UnsupportedFormat(_) => "UnsupportedFormatError",
            VisionError::Encode(_) => "EncodeError",
            VisionError::Io(_) | VisionError::Internal(_) => "InternalError",
        }
    }

    /// 启动阶段错误：服务不得开始接收请求
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VisionError::Config(_) | VisionError::NoModelsAvailable { .. }
        )
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for VisionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = serde_json::json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });

        if status.is_server_error() {
            tracing::error!("Request failed: {} ({})", self, status);
        } else {
            tracing::warn!("Request rejected: {} ({})", self, status);
        }

        (status, axum::Json(error_response)).into_response()
    }
}
