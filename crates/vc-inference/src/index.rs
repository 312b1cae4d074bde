use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ndarray::{s, Array2};
use ndarray_npy::read_npy;
use tracing::debug;
use vc_core::{IndexFeatures, Result, VcError};

/// Reads the full vector set of a persisted similarity index.
pub trait IndexReader: Send {
    fn read(&self, path: &Path) -> Result<Array2<f32>>;
}

/// Index stored as an `N x d` f32 `.npy` matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpyIndexReader;

impl IndexReader for NpyIndexReader {
    fn read(&self, path: &Path) -> Result<Array2<f32>> {
        read_npy(path).map_err(|e| {
            VcError::Index(format!("failed to read index '{}': {e}", path.display()))
        })
    }
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    pub path: PathBuf,
    pub d: usize,
    pub data: Arc<Array2<f32>>,
    pub train_data: Arc<Array2<f32>>,
    pub training_size: usize,
}

impl SimilarityIndex {
    pub fn load(reader: &dyn IndexReader, path: &Path, training_size: usize) -> Result<Self> {
        let data = reader.read(path)?;
        let (rows, d) = data.dim();
        if rows == 0 || d == 0 {
            return Err(VcError::Index(format!(
                "index '{}' is empty ({rows}x{d})",
                path.display()
            )));
        }
        debug!(path = %path.display(), rows, d, "similarity index loaded");
        let data = Arc::new(data);
        Ok(Self {
            path: path.to_path_buf(),
            d,
            train_data: Arc::new(prefix(&data, training_size)),
            data,
            training_size,
        })
    }

    /// Recomputes `train_data` from the vectors already in memory.
    pub fn retrain(&mut self, training_size: usize) {
        self.train_data = Arc::new(prefix(&self.data, training_size));
        self.training_size = training_size;
    }

    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    pub fn features(&self) -> IndexFeatures {
        IndexFeatures {
            d: self.d,
            data: Arc::clone(&self.data),
            train_data: Arc::clone(&self.train_data),
        }
    }
}

fn prefix(data: &Array2<f32>, n: usize) -> Array2<f32> {
    let n = n.min(data.nrows());
    data.slice(s![..n, ..]).to_owned()
}
