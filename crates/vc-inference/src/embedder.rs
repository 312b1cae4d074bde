use std::path::PathBuf;

use ndarray::{Array1, Array2};
use ort::{
    session::{Session, SessionInputValue},
    tensor::TensorElementType,
    value::Tensor,
};
use tracing::info;
use vc_core::{DeviceConfig, EmbedderLoader, EmbeddingExtractor, Result, VcError};

use crate::session::{build_session, map_ort, resolve_graph, tensor_from_audio_rank};

/// Content feature extractor backed by an ONNX graph.
///
/// The audio goes to the first float input. A graph exported with a selectable
/// output layer also receives it as an int64 input whose name contains `layer`.
pub struct OrtEmbedder {
    session: Session,
}

impl OrtEmbedder {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

impl EmbeddingExtractor for OrtEmbedder {
    fn extract(&mut self, audio: &[f32], output_layer: usize) -> Result<Array2<f32>> {
        let mut inputs: Vec<(String, SessionInputValue<'static>)> = Vec::new();
        for input in self.session.inputs() {
            let name = input.name().to_string();
            let is_layer = name.to_lowercase().contains("layer")
                && input.dtype().tensor_type() == Some(TensorElementType::Int64);
            let value = if is_layer {
                SessionInputValue::from(map_ort(
                    "failed to create layer tensor",
                    Tensor::from_array(Array1::from_vec(vec![output_layer as i64])),
                )?)
            } else {
                let rank = input.dtype().tensor_shape().map_or(2, |s| s.len());
                SessionInputValue::from(tensor_from_audio_rank(rank, audio)?)
            };
            inputs.push((name, value));
        }

        let outputs = map_ort("embedder inference failed", self.session.run(inputs))?;
        if outputs.len() == 0 {
            return Err(VcError::Inference(
                "embedder model returned no outputs".to_string(),
            ));
        }
        let (shape, data) = map_ort(
            "failed to extract embedder output tensor<f32>",
            outputs[0].try_extract_tensor::<f32>(),
        )?;
        let (frames, channels) = match shape.len() {
            3 => (shape[1] as usize, shape[2] as usize),
            2 => (shape[0] as usize, shape[1] as usize),
            n => {
                return Err(VcError::Inference(format!(
                    "embedder output has rank {n}, expected [1, frames, channels]"
                )))
            }
        };
        Array2::from_shape_vec((frames, channels), data.to_vec())
            .map_err(|e| VcError::Inference(format!("failed to shape embedder output: {e}")))
    }
}

/// Loads `<model_dir>/<id>.onnx`, or the `.fp16.onnx` export under half
/// precision.
#[derive(Debug, Clone)]
pub struct OrtEmbedderLoader {
    pub model_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl EmbedderLoader for OrtEmbedderLoader {
    fn load(&self, model_id: &str, device: &DeviceConfig) -> Result<Box<dyn EmbeddingExtractor>> {
        let graph = resolve_graph(&self.model_dir.join(format!("{model_id}.onnx")), device);
        info!(model = %graph.display(), "loading embedder");
        let session = build_session(&graph, &self.cache_dir, &format!("embedder-{model_id}"), device)?;
        Ok(Box::new(OrtEmbedder::new(session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_embedder_graph_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let loader = OrtEmbedderLoader {
            model_dir: dir.path().to_path_buf(),
            cache_dir: dir.path().join("cache"),
        };
        let err = loader
            .load("contentvec", &DeviceConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("contentvec.onnx"));
    }
}
