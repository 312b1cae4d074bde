//! Identity-keyed cache of the expensive per-pipeline resources.
//!
//! Each resource is held as an `Option` tagged with the key it was built
//! from. `ensure_ready` compares keys and rebuilds only what changed:
//!
//! * checkpoint: keyed by path; a new one drops the engine and speaker count.
//! * network: keyed by `(checkpoint path, variant)`.
//! * index: [`IndexState`], moved by an [`IndexTransition`] per request.
//! * engine: built lazily whenever absent.
//!
//! The embedder is loaded once on first use and kept until [`ResourceCache::clear`].

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use vc_core::{
    AudioSegmenter, DeviceConfig, EmbedderLoader, EmbeddingExtractor, MatchingEngine,
    MatchingEngineFactory, NetworkVariant, PipelineConfig, Result, SynthesisNetwork, VcError,
};
use vc_audio::SilenceSegmenter;

use crate::checkpoint::{Checkpoint, CheckpointReader, SafetensorsCheckpointReader};
use crate::embedder::OrtEmbedderLoader;
use crate::index::{IndexReader, NpyIndexReader, SimilarityIndex};
use crate::network::{NetworkFactory, OrtNetworkFactory};

/// The loaders and external stages a pipeline drives.
pub struct Collaborators {
    pub checkpoints: Box<dyn CheckpointReader>,
    pub networks: Box<dyn NetworkFactory>,
    pub embedders: Box<dyn EmbedderLoader>,
    pub indexes: Box<dyn IndexReader>,
    pub engines: Box<dyn MatchingEngineFactory>,
    pub segmenter: Box<dyn AudioSegmenter>,
}

impl Collaborators {
    /// ONNX Runtime models, safetensors checkpoints, `.npy` indexes and the
    /// silence segmenter. The matching engine is always supplied by the caller.
    pub fn onnx(config: &PipelineConfig, engines: Box<dyn MatchingEngineFactory>) -> Self {
        ort::init().commit();
        Self {
            checkpoints: Box::new(SafetensorsCheckpointReader),
            networks: Box::new(OrtNetworkFactory {
                cache_dir: config.cache_dir.clone(),
            }),
            embedders: Box::new(OrtEmbedderLoader {
                model_dir: config.model_dir.clone(),
                cache_dir: config.cache_dir.clone(),
            }),
            indexes: Box::new(NpyIndexReader),
            engines,
            segmenter: Box::new(SilenceSegmenter::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub checkpoint_loads: usize,
    pub network_builds: usize,
    pub index_loads: usize,
    pub train_data_builds: usize,
    pub engine_builds: usize,
    pub embedder_loads: usize,
}

#[derive(Debug, Default)]
pub enum IndexState {
    #[default]
    Absent,
    Ready(SimilarityIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTransition {
    Keep,
    Clear,
    Reload,
    Retrain,
}

impl IndexState {
    pub fn transition(&self, path: Option<&Path>, training_size: usize) -> IndexTransition {
        match (self, path) {
            (IndexState::Absent, None) => IndexTransition::Keep,
            (IndexState::Ready(_), None) => IndexTransition::Clear,
            (IndexState::Absent, Some(_)) => IndexTransition::Reload,
            (IndexState::Ready(index), Some(path)) if index.path != path => {
                IndexTransition::Reload
            }
            (IndexState::Ready(index), Some(_)) if index.training_size != training_size => {
                IndexTransition::Retrain
            }
            (IndexState::Ready(_), Some(_)) => IndexTransition::Keep,
        }
    }

    pub fn index(&self) -> Option<&SimilarityIndex> {
        match self {
            IndexState::Absent => None,
            IndexState::Ready(index) => Some(index),
        }
    }
}

struct LoadedNetwork {
    key: (PathBuf, NetworkVariant),
    network: Box<dyn SynthesisNetwork>,
}

struct LoadedEmbedder {
    id: String,
    extractor: Box<dyn EmbeddingExtractor>,
}

/// Mutable borrows of everything a conversion touches.
pub struct ReadyParts<'a> {
    pub checkpoint: &'a Checkpoint,
    pub engine: &'a mut dyn MatchingEngine,
    pub network: &'a mut dyn SynthesisNetwork,
    pub embedder: &'a mut dyn EmbeddingExtractor,
}

#[derive(Default)]
pub struct ResourceCache {
    checkpoint: Option<Checkpoint>,
    network: Option<LoadedNetwork>,
    embedder: Option<LoadedEmbedder>,
    index: IndexState,
    engine: Option<Box<dyn MatchingEngine>>,
    speakers: Option<usize>,
    stats: CacheStats,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings checkpoint, network, index and engine in line with the request.
    ///
    /// Load failures propagate; whatever was already cached for other keys
    /// stays usable.
    pub fn ensure_ready(
        &mut self,
        collaborators: &Collaborators,
        device: &DeviceConfig,
        checkpoint_path: &Path,
        index_path: Option<&Path>,
        training_size: usize,
    ) -> Result<()> {
        if self.checkpoint.as_ref().map(|c| c.path.as_path()) != Some(checkpoint_path) {
            let checkpoint = Checkpoint::load(collaborators.checkpoints.as_ref(), checkpoint_path)?;
            self.engine = None;
            self.speakers = None;
            self.checkpoint = Some(checkpoint);
            self.stats.checkpoint_loads += 1;
        }
        let checkpoint = self
            .checkpoint
            .as_ref()
            .ok_or(VcError::NotReady("checkpoint"))?;

        let key = (checkpoint.path.clone(), checkpoint.variant());
        if self.network.as_ref().map(|n| &n.key) != Some(&key) {
            // Release the previous network's device memory before building.
            self.network = None;
            let network = collaborators
                .networks
                .build(key.1, checkpoint, device)?;
            info!(variant = key.1.name(), "synthesis network ready");
            self.network = Some(LoadedNetwork { key, network });
            self.stats.network_builds += 1;
        }

        let transition = self.index.transition(index_path, training_size);
        match (transition, index_path) {
            (IndexTransition::Keep, _) => {}
            (IndexTransition::Clear, _) => {
                debug!("no index requested, clearing index state");
                self.index = IndexState::Absent;
                self.engine = None;
            }
            (IndexTransition::Reload, Some(path)) => {
                let index =
                    SimilarityIndex::load(collaborators.indexes.as_ref(), path, training_size)?;
                self.index = IndexState::Ready(index);
                self.engine = None;
                self.stats.index_loads += 1;
                self.stats.train_data_builds += 1;
            }
            (IndexTransition::Retrain, _) => {
                if let IndexState::Ready(index) = &mut self.index {
                    debug!(
                        from = index.training_size,
                        to = training_size,
                        "recomputing index training subset"
                    );
                    index.retrain(training_size);
                    self.engine = None;
                    self.stats.train_data_builds += 1;
                }
            }
            (IndexTransition::Reload, None) => {}
        }

        if self.engine.is_none() {
            let features = self.index.index().map(SimilarityIndex::features);
            let engine = collaborators
                .engines
                .build(checkpoint.sample_rate, device, features)?;
            self.engine = Some(engine);
            self.stats.engine_builds += 1;
        }

        if self.speakers.is_none() {
            self.speakers = Some(checkpoint.speaker_count()?);
        }
        Ok(())
    }

    /// Loads the embedder on first use. A later request for another model id
    /// keeps the one already loaded.
    pub fn ensure_embedder(
        &mut self,
        loader: &dyn EmbedderLoader,
        model_id: &str,
        device: &DeviceConfig,
    ) -> Result<()> {
        if let Some(loaded) = &self.embedder {
            if loaded.id != model_id {
                warn!(
                    loaded = %loaded.id,
                    requested = model_id,
                    "embedder already loaded, ignoring requested model"
                );
            }
            return Ok(());
        }
        let extractor = loader.load(model_id, device)?;
        self.embedder = Some(LoadedEmbedder {
            id: model_id.to_string(),
            extractor,
        });
        self.stats.embedder_loads += 1;
        Ok(())
    }

    pub fn parts(&mut self) -> Result<ReadyParts<'_>> {
        let checkpoint = self
            .checkpoint
            .as_ref()
            .ok_or(VcError::NotReady("checkpoint"))?;
        let engine = self
            .engine
            .as_mut()
            .ok_or(VcError::NotReady("matching engine"))?;
        let network = self
            .network
            .as_mut()
            .ok_or(VcError::NotReady("synthesis network"))?;
        let embedder = self
            .embedder
            .as_mut()
            .ok_or(VcError::NotReady("embedder"))?;
        Ok(ReadyParts {
            checkpoint,
            engine: engine.as_mut(),
            network: network.network.as_mut(),
            embedder: embedder.extractor.as_mut(),
        })
    }

    /// Drops every cached resource, dependents first.
    pub fn clear(&mut self) {
        drop(self.engine.take());
        drop(self.network.take());
        drop(self.embedder.take());
        self.index = IndexState::Absent;
        drop(self.checkpoint.take());
        self.speakers = None;
        info!("released cached models");
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub fn index_state(&self) -> &IndexState {
        &self.index
    }

    pub fn index(&self) -> Option<&SimilarityIndex> {
        self.index.index()
    }

    pub fn network_variant(&self) -> Option<NetworkVariant> {
        self.network.as_ref().map(|n| n.key.1)
    }

    pub fn embedder_id(&self) -> Option<&str> {
        self.embedder.as_ref().map(|e| e.id.as_str())
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn speaker_count(&self) -> Option<usize> {
        self.speakers
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoint.is_none()
            && self.network.is_none()
            && self.embedder.is_none()
            && self.engine.is_none()
            && matches!(self.index, IndexState::Absent)
            && self.speakers.is_none()
    }
}
