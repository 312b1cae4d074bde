use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VcError>;

#[derive(Debug, Error)]
pub enum VcError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("audio backend error: {0}")]
    Audio(String),
    #[error("inference engine error: {0}")]
    Inference(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("similarity index error: {0}")]
    Index(String),
    #[error("resource not ready: {0}")]
    NotReady(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a failed conversion.
///
/// The variants keep the three failure stages apart so callers can tell a
/// segmentation problem from a chunk that failed mid-batch.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("error with split audio: {0}")]
    Segmentation(String),
    #[error("error processing segmented audio at {}: {source}", chunk.display())]
    Batch {
        chunk: PathBuf,
        #[source]
        source: VcError,
    },
    #[error("error during voice conversion: {0}")]
    Synthesis(#[from] VcError),
}
