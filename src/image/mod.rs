pub mod annotate;
pub mod loader;
pub mod postprocessing;
pub mod preprocessing;
pub mod sink;

pub use annotate::Annotator;
pub use loader::ImageLoader;
pub use postprocessing::{
    BoundingBox, ClassScore, Detection, DetectionResult, Postprocessor, StageTimings,
};
pub use preprocessing::{PreprocessedImage, Preprocessor};
pub use sink::{DirectorySink, ImageSink};
