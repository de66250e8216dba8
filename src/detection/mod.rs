pub mod aggregate;
pub mod pipeline;
pub mod types;

pub use aggregate::ResultAggregator;
pub use pipeline::InferencePipeline;
pub use types::{DetectionRecord, PipelineOptions, ResponsePayload, SpeciesPrediction};
