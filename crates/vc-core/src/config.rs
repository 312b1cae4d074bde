use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{PitchMethod, Result, VcError};

/// Where model sessions are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(i32),
}

impl Device {
    /// Parses `cpu`, `cuda`, `cuda:1`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw == "cpu" {
            return Ok(Device::Cpu);
        }
        match raw.strip_prefix("cuda") {
            Some("") => Ok(Device::Cuda(0)),
            Some(rest) => rest
                .trim_start_matches(':')
                .parse::<i32>()
                .map(Device::Cuda)
                .map_err(|e| VcError::Config(format!("invalid cuda device '{raw}': {e}"))),
            None => Err(VcError::Config(format!("unknown device '{raw}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Full,
    Half,
}

/// Placement and numeric precision shared by every model load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device: Device,
    pub precision: Precision,
}

impl DeviceConfig {
    /// Half precision on CUDA, full precision on CPU.
    pub fn for_device(device: Device) -> Self {
        let precision = match device {
            Device::Cuda(_) => Precision::Half,
            Device::Cpu => Precision::Full,
        };
        Self { device, precision }
    }

    pub fn is_half(&self) -> bool {
        self.precision == Precision::Half
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub device: DeviceConfig,
    /// Directory holding embedder graphs (`<embedder_id>.onnx`).
    pub model_dir: PathBuf,
    /// Optimized session graphs are written here.
    pub cache_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            model_dir: PathBuf::from("model"),
            cache_dir: PathBuf::from("ort_cache"),
        }
    }
}

impl PipelineConfig {
    /// Reads `RUST_VC_DEVICE`, `RUST_VC_MODEL_DIR` and `RUST_VC_CACHE_DIR`,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(device) = optional_env("RUST_VC_DEVICE") {
            cfg.device = DeviceConfig::for_device(Device::parse(&device)?);
        }
        if let Some(dir) = optional_env("RUST_VC_MODEL_DIR") {
            cfg.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = optional_env("RUST_VC_CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(dir);
        }
        tracing::debug!(
            device = ?cfg.device.device,
            precision = ?cfg.device.precision,
            model_dir = %cfg.model_dir.display(),
            "pipeline config resolved"
        );
        Ok(cfg)
    }
}

/// Parameters of one top-level conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    /// Pitch shift in semitones.
    pub f0_up_key: i32,
    pub filter_radius: u32,
    pub index_rate: f32,
    pub rms_mix_rate: f32,
    pub protect: f32,
    pub hop_length: u32,
    pub f0_method: PitchMethod,
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub model_path: PathBuf,
    /// Empty disables index matching.
    pub index_path: String,
    pub split_audio: bool,
    pub f0_autotune: bool,
    pub embedder_model: String,
    pub training_data_size: usize,
    pub debug: bool,
    /// 0 keeps the checkpoint rate.
    pub resample_sr: u32,
    pub f0_file: Option<PathBuf>,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            f0_up_key: 0,
            filter_radius: 3,
            index_rate: 0.75,
            rms_mix_rate: 1.0,
            protect: 0.5,
            hop_length: 128,
            f0_method: PitchMethod::Rmvpe,
            input_path: PathBuf::new(),
            output_path: None,
            model_path: PathBuf::new(),
            index_path: String::new(),
            split_audio: false,
            f0_autotune: false,
            embedder_model: "contentvec".to_string(),
            training_data_size: 10_000,
            debug: false,
            resample_sr: 0,
            f0_file: None,
        }
    }
}

impl InferenceParams {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            VcError::Config(format!("invalid request file {}: {e}", path.display()))
        })
    }

    /// The index path to load, or `None` when the request has none.
    pub fn index_file(&self) -> Option<PathBuf> {
        let trimmed = self.index_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuda_defaults_to_half_precision() {
        assert!(DeviceConfig::for_device(Device::Cuda(0)).is_half());
        assert!(!DeviceConfig::for_device(Device::Cpu).is_half());
    }

    #[test]
    fn device_parse_accepts_ordinal() {
        assert_eq!(Device::parse("cuda:1").unwrap(), Device::Cuda(1));
        assert_eq!(Device::parse("CUDA").unwrap(), Device::Cuda(0));
        assert_eq!(Device::parse("cpu").unwrap(), Device::Cpu);
        assert!(Device::parse("tpu").is_err());
    }

    #[test]
    fn blank_index_path_means_no_index() {
        let mut params = InferenceParams::default();
        params.index_path = "   ".to_string();
        assert!(params.index_file().is_none());
        params.index_path = "logs/foo.npy".to_string();
        assert_eq!(params.index_file(), Some(PathBuf::from("logs/foo.npy")));
    }

    #[test]
    fn request_loads_from_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        fs::write(
            &path,
            r#"{"f0_up_key": 12, "f0_method": "hybrid[rmvpe+fcpe]", "model_path": "m.safetensors"}"#,
        )
        .unwrap();
        let params = InferenceParams::from_json_file(&path).unwrap();
        assert_eq!(params.f0_up_key, 12);
        assert_eq!(params.model_path, PathBuf::from("m.safetensors"));
        assert_eq!(params.training_data_size, 10_000);
        assert_eq!(params.f0_method.to_string(), "hybrid[rmvpe+fcpe]");
    }
}
