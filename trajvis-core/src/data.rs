//! Row-major matrices and per-epoch snapshots.
//!
//! Graph construction runs on CPU vectors while the embedding network runs
//! on burn tensors; `Matrix` is the hand-off format between the two and the
//! JSON format used for representations and projections on disk.

use std::path::Path;
use std::sync::Arc;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisError};

/// Dense `rows × cols` matrix stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn new(data: Vec<f32>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(VisError::Shape(format!(
                "buffer of {} values cannot hold a {}×{} matrix",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(VisError::Shape("ragged rows".into()));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::new(data, rows.len(), cols)
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Gather rows by index, in order, duplicates allowed.
    pub fn select_rows(&self, idx: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(idx.len() * self.cols);
        for &i in idx {
            data.extend_from_slice(self.row(i));
        }
        Matrix {
            rows: idx.len(),
            cols: self.cols,
            data,
        }
    }

    pub fn slice_rows(&self, start: usize, end: usize) -> Matrix {
        let end = end.min(self.rows);
        let start = start.min(end);
        Matrix {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }

    /// Stack matrices vertically; all inputs must share the column count.
    pub fn vstack(parts: &[&Matrix]) -> Result<Matrix> {
        let cols = parts.first().map(|m| m.cols).unwrap_or(0);
        if parts.iter().any(|m| m.cols != cols) {
            return Err(VisError::Shape("vstack over different widths".into()));
        }
        let rows = parts.iter().map(|m| m.rows).sum();
        let mut data = Vec::with_capacity(rows * cols);
        for m in parts {
            data.extend_from_slice(&m.data);
        }
        Matrix::new(data, rows, cols)
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 2>::from_data(
            TensorData::new(self.data.clone(), Shape::new([self.rows, self.cols])),
            device,
        )
    }

    pub fn from_tensor<B: Backend>(tensor: Tensor<B, 2>) -> Result<Self> {
        let [rows, cols] = tensor.dims();
        let data = tensor_to_vec(tensor)?;
        Matrix::new(data, rows, cols)
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let m: Matrix = serde_json::from_reader(std::io::BufReader::new(file))?;
        Matrix::new(m.data, m.rows, m.cols)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Pull any float tensor back to a flat CPU vector.
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| VisError::TensorData(format!("{e:?}")))
}

/// One epoch's representation of every sample. Immutable once captured.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub epoch: usize,
    pub representation: Arc<Matrix>,
}

impl Snapshot {
    pub fn new(epoch: usize, representation: Matrix) -> Self {
        Self {
            epoch,
            representation: Arc::new(representation),
        }
    }

    pub fn n_samples(&self) -> usize {
        self.representation.rows
    }

    pub fn dim(&self) -> usize {
        self.representation.cols
    }
}
