use std::{
    fs,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use ndarray::{Array1, Array2, Array3};
use ort::{
    ep::{self, ExecutionProviderDispatch},
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::debug;
use vc_core::{Device, DeviceConfig, Result, VcError};

pub(crate) fn map_ort<T>(context: &str, result: ort::Result<T>) -> Result<T> {
    result.map_err(|e| VcError::Inference(format!("{context}: {e}")))
}

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Cuda(device_id) => vec![ep::CUDA::default()
            .with_device_id(device_id)
            .with_conv_algorithm_search(ep::cuda::ConvAlgorithmSearch::Exhaustive)
            .build()
            .error_on_failure()],
        Device::Cpu => Vec::new(),
    }
}

/// Picks `<stem>.fp16.onnx` over `<stem>.onnx` when half precision is
/// requested and the reduced graph exists.
pub(crate) fn resolve_graph(graph: &Path, device: &DeviceConfig) -> PathBuf {
    if device.is_half() {
        let half = graph.with_extension("fp16.onnx");
        if half.exists() {
            return half;
        }
        debug!(graph = %graph.display(), "no fp16 graph, loading full precision");
    }
    graph.to_path_buf()
}

/// Commits a session for `model_path` on `device`, reusing an optimized graph
/// from `cache_dir` when one exists for the same file size and mtime.
pub(crate) fn build_session(
    model_path: &Path,
    cache_dir: &Path,
    cache_tag: &str,
    device: &DeviceConfig,
) -> Result<Session> {
    if !model_path.exists() {
        return Err(VcError::Config(format!(
            "model file not found: {}",
            model_path.display()
        )));
    }
    fs::create_dir_all(cache_dir).map_err(|e| {
        VcError::Inference(format!(
            "failed to create cache dir '{}': {e}",
            cache_dir.display()
        ))
    })?;
    let optimized = optimized_cache_path(cache_dir, cache_tag, model_path);
    let load_path = if optimized.exists() {
        optimized.as_path()
    } else {
        model_path
    };
    let eps = execution_providers(device.device);

    debug!(
        model = %load_path.display(),
        device = ?device.device,
        precision = ?device.precision,
        "building onnx session"
    );
    map_ort(
        "failed to build session",
        Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_optimized_model_path(&optimized))
            .and_then(|b| b.with_execution_providers(eps.as_slice()))
            .and_then(|b| b.commit_from_file(load_path)),
    )
}

fn optimized_cache_path(cache_dir: &Path, cache_tag: &str, model_path: &Path) -> PathBuf {
    let (size, mtime_ns) = fs::metadata(model_path)
        .ok()
        .map(|m| {
            let size = m.len();
            let mtime_ns = m
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            (size, mtime_ns)
        })
        .unwrap_or((0, 0));
    cache_dir.join(format!("{cache_tag}.{size}.{mtime_ns}.opt.onnx"))
}

pub(crate) fn tensor_from_audio_rank(rank: usize, samples: &[f32]) -> Result<Tensor<f32>> {
    match rank {
        1 => map_ort(
            "failed to create rank1 audio tensor",
            Tensor::from_array(Array1::from_vec(samples.to_vec())),
        ),
        2 => map_ort(
            "failed to create rank2 audio tensor",
            Tensor::from_array(
                Array2::from_shape_vec((1, samples.len()), samples.to_vec()).map_err(|e| {
                    VcError::Inference(format!("failed to shape rank2 audio tensor: {e}"))
                })?,
            ),
        ),
        _ => map_ort(
            "failed to create rank3 audio tensor",
            Tensor::from_array(
                Array3::from_shape_vec((1, 1, samples.len()), samples.to_vec()).map_err(|e| {
                    VcError::Inference(format!("failed to shape rank3 audio tensor: {e}"))
                })?,
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vc_core::Precision;

    #[test]
    fn half_precision_prefers_fp16_graph() {
        let dir = tempfile::tempdir().unwrap();
        let graph = dir.path().join("contentvec.onnx");
        let half = dir.path().join("contentvec.fp16.onnx");
        fs::write(&graph, b"x").unwrap();

        let cuda = DeviceConfig::for_device(Device::Cuda(0));
        assert_eq!(resolve_graph(&graph, &cuda), graph);
        fs::write(&half, b"x").unwrap();
        assert_eq!(resolve_graph(&graph, &cuda), half);

        let full = DeviceConfig {
            device: Device::Cuda(0),
            precision: Precision::Full,
        };
        assert_eq!(resolve_graph(&graph, &full), graph);
    }

    #[test]
    fn cache_path_tracks_model_size() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("net.onnx");
        fs::write(&model, b"12345").unwrap();
        let cached = optimized_cache_path(dir.path(), "network", &model);
        let name = cached.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("network.5."));
        assert!(name.ends_with(".opt.onnx"));
    }

    #[test]
    fn missing_model_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_session(
            &dir.path().join("absent.onnx"),
            dir.path(),
            "embedder",
            &DeviceConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, VcError::Config(_)));
    }
}
