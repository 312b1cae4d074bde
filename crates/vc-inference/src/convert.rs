//! Per-utterance conversion control flow.
//!
//! A request either converts its input in one pass or, when splitting is
//! requested, splits it into chunk files, converts every chunk in place with
//! `Converter::convert_whole` and merges the results. `convert_whole` has no
//! split parameter, so a chunk can never be split again.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{error, info};
use vc_audio::{load_audio, timestamps_path, write_wav};
use vc_core::{
    ConversionError, DeviceConfig, InferenceParams, PitchMethod, Result, SynthesisRequest, VcError,
};
use vc_signal::{limit_peak, resample_linear, MODEL_INPUT_RATE, PEAK_CEILING};

use crate::cache::{Collaborators, ReadyParts, ResourceCache};

/// Single-speaker checkpoints always render speaker 0.
pub const SPEAKER_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub f0_up_key: i32,
    pub f0_method: PitchMethod,
    pub filter_radius: u32,
    pub index_rate: f32,
    pub rms_mix_rate: f32,
    pub protect: f32,
    pub hop_length: u32,
    pub f0_autotune: bool,
    pub f0_file: Option<PathBuf>,
    /// Raw index path as supplied by the caller.
    pub index_path: String,
    pub resample_sr: u32,
    pub split_audio: bool,
    pub embedder_model: String,
    pub debug: bool,
}

impl From<&InferenceParams> for ConversionRequest {
    fn from(p: &InferenceParams) -> Self {
        Self {
            f0_up_key: p.f0_up_key,
            f0_method: p.f0_method.clone(),
            filter_radius: p.filter_radius,
            index_rate: p.index_rate,
            rms_mix_rate: p.rms_mix_rate,
            protect: p.protect,
            hop_length: p.hop_length,
            f0_autotune: p.f0_autotune,
            f0_file: p.f0_file.clone(),
            index_path: p.index_path.clone(),
            resample_sr: p.resample_sr,
            split_audio: p.split_audio,
            embedder_model: p.embedder_model.clone(),
            debug: p.debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl Conversion {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Sample rates resolved for one call. The cached checkpoint is never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionContext {
    pub model_sr: u32,
    pub output_sr: u32,
}

impl ConversionContext {
    /// `resample_sr` applies only when it is at least the model input rate.
    pub fn resolve(model_sr: u32, resample_sr: u32) -> Self {
        let output_sr = if resample_sr >= MODEL_INPUT_RATE {
            resample_sr
        } else {
            model_sr
        };
        Self {
            model_sr,
            output_sr,
        }
    }
}

/// Strips surrounding whitespace and quotes, then maps a `trained` index name
/// to its `added` counterpart.
pub fn normalize_index_path(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || c == '"')
        .replace("trained", "added")
}

pub(crate) struct Converter<'a> {
    pub collaborators: &'a Collaborators,
    pub cache: &'a mut ResourceCache,
    pub device: &'a DeviceConfig,
}

impl Converter<'_> {
    pub fn run(
        &mut self,
        request: &ConversionRequest,
        input: &Path,
        output: Option<&Path>,
    ) -> std::result::Result<Conversion, ConversionError> {
        let index_path = normalize_index_path(&request.index_path);
        let result = if request.split_audio {
            self.convert_segmented(request, &index_path, input, output)
        } else {
            self.convert_whole(request, &index_path, input, output)
                .map_err(ConversionError::from)
        };
        if let Err(e) = &result {
            error!(input = %input.display(), "{e}");
        }
        result
    }

    /// Converts `input` in one pass.
    pub fn convert_whole(
        &mut self,
        request: &ConversionRequest,
        index_path: &str,
        input: &Path,
        output: Option<&Path>,
    ) -> Result<Conversion> {
        if request.debug {
            info!(path = %input.display(), "Loading audio");
        }
        let mut audio = load_audio(input, MODEL_INPUT_RATE)
            .map_err(|e| VcError::Audio(format!("{e:#}")))?;
        limit_peak(&mut audio, PEAK_CEILING);

        self.cache.ensure_embedder(
            self.collaborators.embedders.as_ref(),
            &request.embedder_model,
            self.device,
        )?;
        let ReadyParts {
            checkpoint,
            engine,
            network,
            embedder,
        } = self.cache.parts()?;
        let context = ConversionContext::resolve(checkpoint.sample_rate, request.resample_sr);

        let synthesis = SynthesisRequest {
            speaker_id: SPEAKER_ID,
            input_path: input,
            f0_up_key: request.f0_up_key,
            f0_method: &request.f0_method,
            index_path,
            index_rate: request.index_rate,
            f0: checkpoint.f0,
            filter_radius: request.filter_radius,
            target_sr: context.model_sr,
            resample_sr: request.resample_sr,
            rms_mix_rate: request.rms_mix_rate,
            version: checkpoint.version,
            protect: request.protect,
            hop_length: request.hop_length,
            f0_autotune: request.f0_autotune,
            f0_file: request.f0_file.as_deref(),
        };
        let synthesized = engine.pipeline(embedder, network, &audio, &synthesis)?;
        finish(
            context,
            synthesized.sample_rate,
            synthesized.samples,
            output,
            request.debug,
        )
    }

    fn convert_segmented(
        &mut self,
        request: &ConversionRequest,
        index_path: &str,
        input: &Path,
        output: Option<&Path>,
    ) -> std::result::Result<Conversion, ConversionError> {
        if request.debug {
            info!(path = %input.display(), "Splitting audio");
        }
        let collaborators = self.collaborators;
        let segmenter = collaborators.segmenter.as_ref();
        let work_dir = segmenter
            .split(input)
            .map_err(|e| ConversionError::Segmentation(e.to_string()))?;
        let chunks = list_chunks(&work_dir).map_err(|e| {
            ConversionError::Segmentation(format!(
                "failed to list {}: {e}",
                work_dir.display()
            ))
        })?;

        for chunk in chunks {
            self.convert_whole(request, index_path, &chunk, Some(&chunk))
                .map_err(|source| ConversionError::Batch {
                    chunk: chunk.clone(),
                    source,
                })?;
        }

        let manifest = timestamps_path(&work_dir, input);
        let (sample_rate, samples) = segmenter.merge(&manifest)?;
        fs::remove_file(&manifest).map_err(VcError::from)?;

        let model_sr = self
            .cache
            .checkpoint()
            .ok_or(VcError::NotReady("checkpoint"))?
            .sample_rate;
        let context = ConversionContext::resolve(model_sr, request.resample_sr);
        finish(context, sample_rate, samples, output, request.debug).map_err(ConversionError::from)
    }
}

/// Brings the waveform to the output rate and persists it when asked.
fn finish(
    context: ConversionContext,
    sample_rate: u32,
    samples: Vec<f32>,
    output: Option<&Path>,
    debug: bool,
) -> Result<Conversion> {
    let samples = if sample_rate == context.output_sr {
        samples
    } else {
        resample_linear(&samples, sample_rate, context.output_sr)
    };
    if let Some(path) = output {
        if debug {
            info!(path = %path.display(), sample_rate = context.output_sr, "Saving file");
        }
        write_wav(path, &samples, context.output_sr)
            .map_err(|e| VcError::Audio(format!("{e:#}")))?;
    }
    Ok(Conversion {
        sample_rate: context.output_sr,
        samples,
    })
}

/// Top-level `.wav` files of `dir` in lexical order.
fn list_chunks(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut chunks = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if is_wav && path.is_file() {
            chunks.push(path);
        }
    }
    chunks.sort();
    Ok(chunks)
}
