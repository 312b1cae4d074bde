use std::path::PathBuf;

use ndarray::{Array1, Array2, Array3, ArrayView2};
use ort::{
    session::{Session, SessionInputValue},
    tensor::TensorElementType,
    value::Tensor,
};
use tracing::{info, warn};
use vc_core::{DeviceConfig, NetworkVariant, PitchCurve, Result, SynthesisNetwork, VcError};

use crate::checkpoint::Checkpoint;
use crate::session::{build_session, map_ort, resolve_graph};

/// Channels of the flow noise input of the exported generators.
const NOISE_CHANNELS: usize = 192;

/// Builds the synthesis network for a checkpoint.
pub trait NetworkFactory: Send {
    fn build(
        &self,
        variant: NetworkVariant,
        checkpoint: &Checkpoint,
        device: &DeviceConfig,
    ) -> Result<Box<dyn SynthesisNetwork>>;
}

/// Loads the graph exported next to the checkpoint (`<stem>.onnx`).
#[derive(Debug, Clone)]
pub struct OrtNetworkFactory {
    pub cache_dir: PathBuf,
}

impl NetworkFactory for OrtNetworkFactory {
    fn build(
        &self,
        variant: NetworkVariant,
        checkpoint: &Checkpoint,
        device: &DeviceConfig,
    ) -> Result<Box<dyn SynthesisNetwork>> {
        let graph = resolve_graph(&checkpoint.path.with_extension("onnx"), device);
        info!(
            model = %graph.display(),
            variant = variant.name(),
            "loading synthesis network"
        );
        let tag = graph
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "network".to_string());
        let session = build_session(&graph, &self.cache_dir, &tag, device)?;
        Ok(Box::new(RvcNetwork::new(variant, session)))
    }
}

pub struct RvcNetwork {
    variant: NetworkVariant,
    session: Session,
}

impl RvcNetwork {
    pub fn new(variant: NetworkVariant, session: Session) -> Self {
        let network = Self { variant, session };
        if let Some(width) = network.phone_feature_dim() {
            if width != variant.phone_channels() {
                warn!(
                    graph_width = width,
                    expected = variant.phone_channels(),
                    variant = variant.name(),
                    "phone feature width does not match the checkpoint version"
                );
            }
        }
        network
    }

    fn phone_feature_dim(&self) -> Option<usize> {
        for input in self.session.inputs() {
            let name = input.name().to_lowercase();
            if !matches!(classify_rvc_input(&name), Some(RvcInputKind::Phone)) {
                continue;
            }
            if let Some(shape) = input.dtype().tensor_shape() {
                if shape.len() >= 3 && shape[2] > 0 {
                    return Some(shape[2] as usize);
                }
            }
        }
        None
    }
}

impl SynthesisNetwork for RvcNetwork {
    fn variant(&self) -> NetworkVariant {
        self.variant
    }

    fn synthesize(
        &mut self,
        phone: ArrayView2<'_, f32>,
        pitch: Option<PitchCurve<'_>>,
        speaker_id: i64,
    ) -> Result<Vec<f32>> {
        if self.variant.uses_pitch() && pitch.is_none() {
            return Err(VcError::Inference(format!(
                "{} needs a pitch curve",
                self.variant.name()
            )));
        }
        let (frames, channels) = phone.dim();
        let phone = Array3::from_shape_vec((1, frames, channels), phone.iter().copied().collect())
            .map_err(|e| VcError::Inference(format!("failed to shape phone as [1, T, C]: {e}")))?;

        let mut input_map: Vec<(String, SessionInputValue<'static>)> = Vec::new();
        for input in self.session.inputs() {
            let name = input.name().to_string();
            let lname = name.to_lowercase();
            let rank = input.dtype().tensor_shape().map_or(1, |shape| shape.len());
            let ty = input.dtype().tensor_type();
            let kind = classify_rvc_input(&lname).unwrap_or_else(|| fallback_kind(rank, ty, &lname));

            let value = match kind {
                RvcInputKind::Phone => SessionInputValue::from(map_ort(
                    "failed to create phone tensor",
                    Tensor::from_array(phone.clone()),
                )?),
                RvcInputKind::Length => SessionInputValue::from(map_ort(
                    "failed to create length tensor",
                    Tensor::from_array(Array1::from_vec(vec![frames as i64])),
                )?),
                RvcInputKind::Pitch => {
                    let curve = require_pitch(pitch, &name)?;
                    let arr = Array2::from_shape_vec((1, curve.coarse.len()), curve.coarse.to_vec())
                        .map_err(|e| {
                            VcError::Inference(format!("failed to shape pitch as [1, T]: {e}"))
                        })?;
                    SessionInputValue::from(map_ort(
                        "failed to create pitch tensor",
                        Tensor::from_array(arr),
                    )?)
                }
                RvcInputKind::PitchF => {
                    let curve = require_pitch(pitch, &name)?;
                    let arr = Array2::from_shape_vec((1, curve.hz.len()), curve.hz.to_vec())
                        .map_err(|e| {
                            VcError::Inference(format!("failed to shape pitchf as [1, T]: {e}"))
                        })?;
                    SessionInputValue::from(map_ort(
                        "failed to create pitchf tensor",
                        Tensor::from_array(arr),
                    )?)
                }
                RvcInputKind::Sid => SessionInputValue::from(map_ort(
                    "failed to create sid tensor",
                    Tensor::from_array(Array1::from_vec(vec![speaker_id])),
                )?),
                RvcInputKind::Rnd => SessionInputValue::from(map_ort(
                    "failed to create rnd tensor",
                    Tensor::from_array(Array3::<f32>::zeros((1, NOISE_CHANNELS, frames))),
                )?),
            };
            input_map.push((name, value));
        }

        let outputs = map_ort("rvc inference failed", self.session.run(input_map))?;
        if outputs.len() == 0 {
            return Err(VcError::Inference(
                "rvc model returned no outputs".to_string(),
            ));
        }
        let (_, data) = map_ort(
            "failed to extract rvc output tensor<f32>",
            outputs[0].try_extract_tensor::<f32>(),
        )?;
        Ok(data.to_vec())
    }
}

fn require_pitch<'a>(pitch: Option<PitchCurve<'a>>, input: &str) -> Result<PitchCurve<'a>> {
    pitch.ok_or_else(|| {
        VcError::Inference(format!("graph input '{input}' needs a pitch curve"))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RvcInputKind {
    Phone,
    Length,
    Pitch,
    PitchF,
    Sid,
    Rnd,
}

fn classify_rvc_input(name: &str) -> Option<RvcInputKind> {
    if name.contains("phone_len") || name.contains("lengths") || name.contains("p_len") {
        return Some(RvcInputKind::Length);
    }
    if name.contains("phone") || name.contains("hubert") || name.contains("feat") {
        return Some(RvcInputKind::Phone);
    }
    if name.contains("pitchf") || name.contains("nsff0") || name.contains("f0") {
        return Some(RvcInputKind::PitchF);
    }
    if name.contains("pitch") {
        return Some(RvcInputKind::Pitch);
    }
    if name.contains("sid") || name.contains("spk") || name.contains("speaker") || name == "ds" {
        return Some(RvcInputKind::Sid);
    }
    if name.contains("rnd") || name.contains("noise") {
        return Some(RvcInputKind::Rnd);
    }
    if name.contains("len") {
        return Some(RvcInputKind::Length);
    }
    None
}

fn fallback_kind(rank: usize, ty: Option<TensorElementType>, name: &str) -> RvcInputKind {
    match (rank, ty) {
        (3, Some(TensorElementType::Float32)) => RvcInputKind::Phone,
        (2, Some(TensorElementType::Float32)) => RvcInputKind::PitchF,
        (2, Some(TensorElementType::Int64)) => RvcInputKind::Pitch,
        (1, Some(TensorElementType::Int64)) if name.contains("len") => RvcInputKind::Length,
        (1, Some(TensorElementType::Int64)) => RvcInputKind::Sid,
        _ => RvcInputKind::Rnd,
    }
}
