pub mod config;
pub mod detection;
pub mod image;
pub mod models;
pub mod utils;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出主要类型
pub use config::{Config, ModelsConfig};
pub use detection::{InferencePipeline, ResponsePayload};
pub use models::{ModelEntry, ModelFamily, ModelRegistry};
pub use utils::error::VisionError;

pub type Result<T> = std::result::Result<T, VisionError>;
