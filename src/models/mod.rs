pub mod backend;
pub mod classifier;
pub mod detector;
pub mod dispatch;
pub mod entry;
pub mod registry;

pub use backend::{InferenceBackend, LoadRequest, ModelLoader, OrtBackend, OrtLoader};
pub use dispatch::{InferenceDispatcher, RawBox, RawPrediction};
pub use entry::{
    ChannelOrder, Device, DevicePreference, ModelEntry, ModelFamily, Normalization,
    DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_CONFIDENCE_THRESHOLD, ORCHID_SPECIES,
};
pub use registry::{ModelInfo, ModelRegistry, RegistryStats};
