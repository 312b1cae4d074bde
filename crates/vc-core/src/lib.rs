pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;

pub use config::{Device, DeviceConfig, InferenceParams, PipelineConfig, Precision};
pub use error::{ConversionError, Result, VcError};
pub use logging::init_logging;
pub use model::{ModelVersion, NetworkVariant, PitchMethod};
pub use pipeline::{
    AudioSegmenter, EmbedderLoader, EmbeddingExtractor, IndexFeatures, MatchingEngine,
    MatchingEngineFactory, PitchCurve, SynthesisNetwork, SynthesisRequest, Synthesized,
};
