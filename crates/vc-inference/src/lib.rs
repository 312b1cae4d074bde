//! Offline voice conversion orchestrator.
//!
//! [`RvcPipeline`] owns the model cache and drives one conversion per
//! request. Models sit behind the collaborator traits of `vc-core`; the ONNX
//! Runtime implementations live in [`embedder`] and [`network`].

pub mod cache;
pub mod checkpoint;
pub mod convert;
pub mod embedder;
pub mod index;
pub mod network;
mod session;
#[cfg(test)]
mod testing;

use std::{any::Any, panic::AssertUnwindSafe, path::Path, time::Instant};

use tracing::{error, info};
use vc_core::{
    ConversionError, InferenceParams, MatchingEngineFactory, PipelineConfig, Result,
};

pub use cache::{CacheStats, Collaborators, IndexState, IndexTransition, ResourceCache};
pub use checkpoint::{Checkpoint, CheckpointReader, RawCheckpoint, SafetensorsCheckpointReader};
pub use convert::{normalize_index_path, Conversion, ConversionContext, ConversionRequest};
pub use embedder::{OrtEmbedder, OrtEmbedderLoader};
pub use index::{IndexReader, NpyIndexReader, SimilarityIndex};
pub use network::{NetworkFactory, OrtNetworkFactory, RvcNetwork};

use convert::Converter;

pub struct RvcPipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    cache: ResourceCache,
}

impl RvcPipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            cache: ResourceCache::new(),
        }
    }

    pub fn with_onnx_runtime(
        config: PipelineConfig,
        engines: Box<dyn MatchingEngineFactory>,
    ) -> Self {
        let collaborators = Collaborators::onnx(&config, engines);
        Self::new(config, collaborators)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Loads or reuses the checkpoint, network, index and matching engine.
    pub fn ensure_ready(
        &mut self,
        checkpoint_path: &Path,
        index_path: Option<&Path>,
        training_size: usize,
    ) -> Result<()> {
        self.cache.ensure_ready(
            &self.collaborators,
            &self.config.device,
            checkpoint_path,
            index_path,
            training_size,
        )
    }

    /// Converts `input`, writing to `output` when given. Failures are logged
    /// and returned; nothing is retried.
    pub fn convert(
        &mut self,
        request: &ConversionRequest,
        input: &Path,
        output: Option<&Path>,
    ) -> std::result::Result<Conversion, ConversionError> {
        Converter {
            collaborators: &self.collaborators,
            cache: &mut self.cache,
            device: &self.config.device,
        }
        .run(request, input, output)
    }

    /// Runs a whole request. Every failure, panics included, is logged and
    /// reported as `None`.
    pub fn infer_pipeline(&mut self, params: &InferenceParams) -> Option<Conversion> {
        let outcome = run_panic_safe("infer_pipeline", || {
            self.ensure_ready(
                &params.model_path,
                params.index_file().as_deref(),
                params.training_data_size,
            )
            .map_err(|e| format!("failed to prepare models: {e}"))?;
            let request = ConversionRequest::from(params);
            let started = Instant::now();
            self.convert(&request, &params.input_path, params.output_path.as_deref())
                .map(|conversion| (conversion, started.elapsed()))
                .map_err(|e| e.to_string())
        });

        match outcome {
            Ok((conversion, elapsed)) => {
                let output = params
                    .output_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                info!(
                    output = %output,
                    elapsed_secs = elapsed.as_secs_f64(),
                    sample_rate = conversion.sample_rate,
                    "conversion completed"
                );
                Some(conversion)
            }
            Err(msg) => {
                error!(
                    input = %params.input_path.display(),
                    model = %params.model_path.display(),
                    "an error occurred during inference: {msg}"
                );
                None
            }
        }
    }

    /// Releases every cached model. The next request reloads from scratch.
    pub fn clean_up(&mut self) {
        self.cache.clear();
    }
}

fn panic_payload_to_string(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}

fn run_panic_safe<T>(
    name: &str,
    f: impl FnOnce() -> std::result::Result<T, String>,
) -> std::result::Result<T, String> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(format!("{name} panicked: {}", panic_payload_to_string(payload))),
    }
}
