//! Target-speaker checkpoints.
//!
//! A checkpoint is a safetensors file whose tensors are the network weights
//! and whose metadata table carries `config` (a JSON array whose last element
//! is the sample rate), `f0` and `version`.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use safetensors::SafeTensors;
use serde_json::Value;
use tracing::debug;
use vc_core::{ModelVersion, NetworkVariant, Result, VcError};

/// Weight entry holding the speaker embedding table.
pub const SPEAKER_EMBEDDING: &str = "emb_g.weight";

#[derive(Debug, Clone, PartialEq)]
pub struct WeightTensor {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

pub type WeightMap = BTreeMap<String, WeightTensor>;

/// Checkpoint contents before any interpretation.
#[derive(Debug, Clone, Default)]
pub struct RawCheckpoint {
    pub config: Vec<Value>,
    pub weights: WeightMap,
    pub f0: Option<i64>,
    pub version: Option<String>,
}

pub trait CheckpointReader: Send {
    fn read(&self, path: &Path) -> Result<RawCheckpoint>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsCheckpointReader;

impl CheckpointReader for SafetensorsCheckpointReader {
    fn read(&self, path: &Path) -> Result<RawCheckpoint> {
        let bytes = fs::read(path).map_err(|e| {
            VcError::Checkpoint(format!("failed to read '{}': {e}", path.display()))
        })?;
        let (_, header) = SafeTensors::read_metadata(&bytes).map_err(|e| {
            VcError::Checkpoint(format!("invalid header in '{}': {e}", path.display()))
        })?;
        let empty = HashMap::new();
        let meta = header.metadata().as_ref().unwrap_or(&empty);

        let config = match meta.get("config") {
            Some(raw) => serde_json::from_str::<Vec<Value>>(raw).map_err(|e| {
                VcError::Checkpoint(format!("config in '{}' is not a list: {e}", path.display()))
            })?,
            None => {
                return Err(VcError::Checkpoint(format!(
                    "'{}' has no config entry",
                    path.display()
                )))
            }
        };
        let f0 = meta
            .get("f0")
            .map(|v| {
                v.trim().parse::<i64>().map_err(|e| {
                    VcError::Checkpoint(format!("invalid f0 flag '{v}': {e}"))
                })
            })
            .transpose()?;
        let version = meta.get("version").map(|v| v.trim().to_string());

        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| {
            VcError::Checkpoint(format!("invalid tensors in '{}': {e}", path.display()))
        })?;
        let weights = tensors
            .tensors()
            .into_iter()
            .map(|(name, view)| {
                let tensor = WeightTensor {
                    dtype: format!("{:?}", view.dtype()),
                    shape: view.shape().to_vec(),
                    data: view.data().to_vec(),
                };
                (name, tensor)
            })
            .collect();

        Ok(RawCheckpoint {
            config,
            weights,
            f0,
            version,
        })
    }
}

/// A loaded checkpoint. Immutable; a different path means a new value.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub path: PathBuf,
    pub version: ModelVersion,
    pub f0: bool,
    pub sample_rate: u32,
    /// Hyperparameter tuple with the true speaker count written back in.
    pub config: Vec<Value>,
    pub weights: WeightMap,
}

impl Checkpoint {
    pub fn load(reader: &dyn CheckpointReader, path: &Path) -> Result<Self> {
        let raw = reader.read(path)?;
        Self::from_raw(path, raw)
    }

    pub fn from_raw(path: &Path, raw: RawCheckpoint) -> Result<Self> {
        let RawCheckpoint {
            mut config,
            weights,
            f0,
            version,
        } = raw;
        if config.len() < 3 {
            return Err(VcError::Checkpoint(format!(
                "config of '{}' has {} entries, need at least 3",
                path.display(),
                config.len()
            )));
        }
        let last = &config[config.len() - 1];
        let sample_rate = parse_sample_rate(last)?;

        let speakers = weights
            .get(SPEAKER_EMBEDDING)
            .and_then(|t| t.shape.first().copied())
            .ok_or_else(|| {
                VcError::Checkpoint(format!(
                    "'{}' has no {SPEAKER_EMBEDDING} tensor",
                    path.display()
                ))
            })?;
        let slot = config.len() - 3;
        config[slot] = Value::from(speakers);

        let version = match version.as_deref() {
            Some(tag) => tag.parse()?,
            None => ModelVersion::V1,
        };
        let f0 = f0.unwrap_or(1) != 0;

        debug!(
            path = %path.display(),
            sample_rate,
            f0,
            version = %version,
            speakers,
            "checkpoint loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            version,
            f0,
            sample_rate,
            config,
            weights,
        })
    }

    pub fn speaker_count(&self) -> Result<usize> {
        let slot = self.config.len().saturating_sub(3);
        self.config
            .get(slot)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| VcError::Checkpoint("speaker count missing from config".to_string()))
    }

    pub fn variant(&self) -> NetworkVariant {
        NetworkVariant::select(self.version, self.f0)
    }
}

/// Accepts `40000`, `"40000"` and `"40k"`.
fn parse_sample_rate(value: &Value) -> Result<u32> {
    let invalid = || VcError::Checkpoint(format!("invalid sample rate entry: {value}"));
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(invalid),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            match s.strip_suffix('k') {
                Some(khz) => khz
                    .parse::<u32>()
                    .ok()
                    .and_then(|k| k.checked_mul(1000))
                    .ok_or_else(invalid),
                None => s.parse::<u32>().map_err(|_| invalid()),
            }
        }
        _ => Err(invalid()),
    }
}
