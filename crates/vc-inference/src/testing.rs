//! In-memory collaborators with shared call counters.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use ndarray::{Array2, ArrayView2};
use serde_json::json;
use vc_audio::SilenceSegmenter;
use vc_core::{
    AudioSegmenter, DeviceConfig, EmbedderLoader, EmbeddingExtractor, IndexFeatures,
    MatchingEngine, MatchingEngineFactory, NetworkVariant, PitchCurve, Result, SynthesisNetwork,
    SynthesisRequest, Synthesized, VcError,
};
use vc_signal::{resample_linear, MODEL_INPUT_RATE};

use crate::cache::Collaborators;
use crate::checkpoint::{
    Checkpoint, CheckpointReader, RawCheckpoint, WeightMap, WeightTensor, SPEAKER_EMBEDDING,
};
use crate::index::IndexReader;
use crate::network::NetworkFactory;

pub const MOCK_SAMPLE_RATE: u32 = 40_000;

/// Checkpoint paths containing `slow` take this long to read.
pub const SLOW_LOAD: Duration = Duration::from_millis(300);

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` under an info-level fmt subscriber and returns what it printed.
pub fn info_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

#[derive(Clone, Default)]
pub struct Mocks {
    checkpoint_reads: Arc<AtomicUsize>,
    network_builds: Arc<AtomicUsize>,
    embedder_loads: Arc<AtomicUsize>,
    index_reads: Arc<AtomicUsize>,
    engine_builds: Arc<AtomicUsize>,
    engine_calls: Arc<AtomicUsize>,
    merges: Arc<AtomicUsize>,
    train_rows: Arc<Mutex<Vec<Option<usize>>>>,
    index_paths: Arc<Mutex<Vec<String>>>,
    /// 1-based engine call that returns an error.
    fail_on: Option<usize>,
    /// 1-based engine call that panics.
    panic_on: Option<usize>,
}

impl Mocks {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::default()
        }
    }

    pub fn panicking_on(call: usize) -> Self {
        Self {
            panic_on: Some(call),
            ..Self::default()
        }
    }

    /// Uses the silence segmenter, counting merges.
    pub fn collaborators(&self) -> Collaborators {
        self.with_segmenter(Box::new(CountingSegmenter {
            mocks: self.clone(),
            inner: SilenceSegmenter::default(),
        }))
    }

    pub fn with_segmenter(&self, segmenter: Box<dyn AudioSegmenter>) -> Collaborators {
        Collaborators {
            checkpoints: Box::new(MockCheckpoints(self.clone())),
            networks: Box::new(MockNetworks(self.clone())),
            embedders: Box::new(MockEmbedders(self.clone())),
            indexes: Box::new(MockIndexes(self.clone())),
            engines: Box::new(MockEngines(self.clone())),
            segmenter,
        }
    }

    pub fn failing_segmenter(&self) -> Box<dyn AudioSegmenter> {
        Box::new(FailingSegmenter(self.clone()))
    }

    pub fn checkpoint_reads(&self) -> usize {
        self.checkpoint_reads.load(Ordering::SeqCst)
    }

    pub fn network_builds(&self) -> usize {
        self.network_builds.load(Ordering::SeqCst)
    }

    pub fn embedder_loads(&self) -> usize {
        self.embedder_loads.load(Ordering::SeqCst)
    }

    pub fn index_reads(&self) -> usize {
        self.index_reads.load(Ordering::SeqCst)
    }

    pub fn engine_builds(&self) -> usize {
        self.engine_builds.load(Ordering::SeqCst)
    }

    pub fn engine_calls(&self) -> usize {
        self.engine_calls.load(Ordering::SeqCst)
    }

    pub fn merges(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    /// Training rows handed to each engine build, `None` for index-free builds.
    pub fn engine_train_rows(&self) -> Vec<Option<usize>> {
        self.train_rows.lock().unwrap().clone()
    }

    pub fn index_paths(&self) -> Vec<String> {
        self.index_paths.lock().unwrap().clone()
    }
}

/// Paths containing `corrupt` fail, `slow` ones sleep for [`SLOW_LOAD`];
/// `v2` and `nof0` pick the variant.
struct MockCheckpoints(Mocks);

impl CheckpointReader for MockCheckpoints {
    fn read(&self, path: &Path) -> Result<RawCheckpoint> {
        self.0.checkpoint_reads.fetch_add(1, Ordering::SeqCst);
        let name = path.to_string_lossy();
        if name.contains("corrupt") {
            return Err(VcError::Checkpoint(format!("truncated file {name}")));
        }
        if name.contains("slow") {
            thread::sleep(SLOW_LOAD);
        }
        let mut weights = WeightMap::new();
        weights.insert(
            SPEAKER_EMBEDDING.to_string(),
            WeightTensor {
                dtype: "F32".to_string(),
                shape: vec![4, 8],
                data: Vec::new(),
            },
        );
        Ok(RawCheckpoint {
            config: vec![json!(1025), json!(32), json!(109), json!(256), json!(MOCK_SAMPLE_RATE)],
            weights,
            f0: name.contains("nof0").then_some(0),
            version: name.contains("v2").then(|| "v2".to_string()),
        })
    }
}

struct MockNetworks(Mocks);

impl NetworkFactory for MockNetworks {
    fn build(
        &self,
        variant: NetworkVariant,
        _checkpoint: &Checkpoint,
        _device: &DeviceConfig,
    ) -> Result<Box<dyn SynthesisNetwork>> {
        self.0.network_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockNetwork(variant)))
    }
}

struct MockNetwork(NetworkVariant);

impl SynthesisNetwork for MockNetwork {
    fn variant(&self) -> NetworkVariant {
        self.0
    }

    fn synthesize(
        &mut self,
        phone: ArrayView2<'_, f32>,
        _pitch: Option<PitchCurve<'_>>,
        _speaker_id: i64,
    ) -> Result<Vec<f32>> {
        Ok(vec![0.0; phone.nrows() * 400])
    }
}

struct MockEmbedders(Mocks);

impl EmbedderLoader for MockEmbedders {
    fn load(&self, _model_id: &str, _device: &DeviceConfig) -> Result<Box<dyn EmbeddingExtractor>> {
        self.0.embedder_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEmbedder))
    }
}

struct MockEmbedder;

impl EmbeddingExtractor for MockEmbedder {
    fn extract(&mut self, audio: &[f32], _output_layer: usize) -> Result<Array2<f32>> {
        Ok(Array2::zeros((audio.len() / 320, 256)))
    }
}

/// 50 x 4 matrix for any path.
struct MockIndexes(Mocks);

impl IndexReader for MockIndexes {
    fn read(&self, _path: &Path) -> Result<Array2<f32>> {
        self.0.index_reads.fetch_add(1, Ordering::SeqCst);
        Ok(Array2::from_shape_fn((50, 4), |(r, c)| (r * 4 + c) as f32))
    }
}

struct MockEngines(Mocks);

impl MatchingEngineFactory for MockEngines {
    fn build(
        &self,
        target_sr: u32,
        _device: &DeviceConfig,
        index: Option<IndexFeatures>,
    ) -> Result<Box<dyn MatchingEngine>> {
        self.0.engine_builds.fetch_add(1, Ordering::SeqCst);
        self.0
            .train_rows
            .lock()
            .unwrap()
            .push(index.map(|f| f.train_data.nrows()));
        Ok(Box::new(MockEngine {
            mocks: self.0.clone(),
            target_sr,
        }))
    }
}

/// Returns the input resampled to the target rate.
struct MockEngine {
    mocks: Mocks,
    target_sr: u32,
}

impl MatchingEngine for MockEngine {
    fn pipeline(
        &mut self,
        embedder: &mut dyn EmbeddingExtractor,
        _network: &mut dyn SynthesisNetwork,
        audio: &[f32],
        request: &SynthesisRequest<'_>,
    ) -> Result<Synthesized> {
        let call = self.mocks.engine_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.mocks
            .index_paths
            .lock()
            .unwrap()
            .push(request.index_path.to_string());
        if self.mocks.panic_on == Some(call) {
            panic!("engine exploded on call {call}");
        }
        if self.mocks.fail_on == Some(call) {
            return Err(VcError::Inference(format!("engine failed on call {call}")));
        }
        embedder.extract(audio, request.version.output_layer())?;
        Ok(Synthesized {
            sample_rate: self.target_sr,
            samples: resample_linear(audio, MODEL_INPUT_RATE, self.target_sr),
        })
    }
}

struct FailingSegmenter(Mocks);

impl AudioSegmenter for FailingSegmenter {
    fn split(&self, input: &Path) -> Result<PathBuf> {
        Err(VcError::Audio(format!("cannot split {}", input.display())))
    }

    fn merge(&self, _manifest: &Path) -> Result<(u32, Vec<f32>)> {
        self.0.merges.fetch_add(1, Ordering::SeqCst);
        Ok((MOCK_SAMPLE_RATE, Vec::new()))
    }
}

struct CountingSegmenter {
    mocks: Mocks,
    inner: SilenceSegmenter,
}

impl AudioSegmenter for CountingSegmenter {
    fn split(&self, input: &Path) -> Result<PathBuf> {
        self.inner.split(input)
    }

    fn merge(&self, manifest: &Path) -> Result<(u32, Vec<f32>)> {
        self.mocks.merges.fetch_add(1, Ordering::SeqCst);
        self.inner.merge(manifest)
    }
}
