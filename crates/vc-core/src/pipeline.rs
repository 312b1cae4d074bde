//! Seams to the model runtimes and audio tools the orchestrator drives.
//!
//! None of these traits know about caching: the orchestrator decides when
//! each collaborator is built, reused or dropped.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ndarray::{Array2, ArrayView2};

use crate::{DeviceConfig, ModelVersion, NetworkVariant, PitchMethod, Result};

/// Produces speaker-independent content features from 16 kHz audio.
pub trait EmbeddingExtractor: Send {
    /// Returns features shaped `[frames, channels]` taken from `output_layer`.
    fn extract(&mut self, audio: &[f32], output_layer: usize) -> Result<Array2<f32>>;
}

/// Coarse (mel-bin) and continuous (Hz) pitch curves, one value per frame.
#[derive(Debug, Clone, Copy)]
pub struct PitchCurve<'a> {
    pub coarse: &'a [i64],
    pub hz: &'a [f32],
}

/// Renders the target speaker's waveform from content features.
pub trait SynthesisNetwork: Send {
    fn variant(&self) -> NetworkVariant;

    /// `pitch` must be `Some` exactly when the variant is pitch conditioned.
    fn synthesize(
        &mut self,
        phone: ArrayView2<'_, f32>,
        pitch: Option<PitchCurve<'_>>,
        speaker_id: i64,
    ) -> Result<Vec<f32>>;
}

/// Similarity index vectors handed to the matching engine.
#[derive(Debug, Clone)]
pub struct IndexFeatures {
    pub d: usize,
    pub data: Arc<Array2<f32>>,
    pub train_data: Arc<Array2<f32>>,
}

/// Everything the per-utterance pipeline needs besides the models and audio.
#[derive(Debug, Clone)]
pub struct SynthesisRequest<'a> {
    pub speaker_id: i64,
    pub input_path: &'a Path,
    pub f0_up_key: i32,
    pub f0_method: &'a PitchMethod,
    pub index_path: &'a str,
    pub index_rate: f32,
    pub f0: bool,
    pub filter_radius: u32,
    /// Rate the network renders at.
    pub target_sr: u32,
    /// Requested output rate, 0 when none.
    pub resample_sr: u32,
    pub rms_mix_rate: f32,
    pub version: ModelVersion,
    pub protect: f32,
    pub hop_length: u32,
    pub f0_autotune: bool,
    pub f0_file: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Per-utterance conversion: features, optional index blending, pitch and
/// synthesis.
pub trait MatchingEngine: Send {
    fn pipeline(
        &mut self,
        embedder: &mut dyn EmbeddingExtractor,
        network: &mut dyn SynthesisNetwork,
        audio: &[f32],
        request: &SynthesisRequest<'_>,
    ) -> Result<Synthesized>;
}

pub trait MatchingEngineFactory: Send {
    /// `index` is `None` when conversion runs without index matching.
    fn build(
        &self,
        target_sr: u32,
        device: &DeviceConfig,
        index: Option<IndexFeatures>,
    ) -> Result<Box<dyn MatchingEngine>>;
}

pub trait EmbedderLoader: Send {
    fn load(&self, model_id: &str, device: &DeviceConfig) -> Result<Box<dyn EmbeddingExtractor>>;
}

/// Splits long audio into chunk files and reassembles converted chunks.
pub trait AudioSegmenter: Send {
    /// Writes contiguous chunk files and returns the directory holding them.
    fn split(&self, input: &Path) -> Result<PathBuf>;

    /// Assembles the chunks listed in `manifest`, returning `(sample_rate, samples)`.
    fn merge(&self, manifest: &Path) -> Result<(u32, Vec<f32>)>;
}
