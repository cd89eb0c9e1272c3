//! The classifier whose training is being visualised.
//!
//! Subject models are resolved by name through [`SubjectRegistry`] when the
//! configuration is loaded; an unknown name fails there, before training.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use burn::prelude::*;
use burn::tensor::activation;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use trajvis_core::backend::{AutoBackend, get_device};
use trajvis_core::data::Matrix;
use trajvis_core::error::{Result, VisError};

use crate::store::ContentStore;

pub trait SubjectModel: Send + Sync {
    fn num_classes(&self) -> usize;

    /// Class probabilities [N, C] for representations [N, D].
    fn predict_proba(&self, x: &Matrix) -> Result<Matrix>;

    /// Arg-max class per row.
    fn predict(&self, x: &Matrix) -> Result<Vec<usize>> {
        let proba = self.predict_proba(x)?;
        Ok((0..proba.rows)
            .map(|i| argmax(proba.row(i)))
            .collect())
    }
}

pub(crate) fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Softmax over an affine map: the representation is the penultimate layer
/// and this is the classifier head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSoftmax {
    /// [D, C]
    pub weights: Matrix,
    /// [C]
    pub bias: Vec<f32>,
}

impl LinearSoftmax {
    pub fn new(weights: Matrix, bias: Vec<f32>) -> Result<Self> {
        if bias.len() != weights.cols {
            return Err(VisError::Shape(format!(
                "{} biases for {} classes",
                bias.len(),
                weights.cols
            )));
        }
        Ok(Self { weights, bias })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let model: LinearSoftmax = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::new(model.weights, model.bias)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

impl SubjectModel for LinearSoftmax {
    fn num_classes(&self) -> usize {
        self.weights.cols
    }

    fn predict_proba(&self, x: &Matrix) -> Result<Matrix> {
        if x.cols != self.weights.rows {
            return Err(VisError::Shape(format!(
                "classifier takes {} features, got {}",
                self.weights.rows, x.cols
            )));
        }
        let device = get_device();
        let c = self.bias.len();
        let bias = Tensor::<AutoBackend, 1>::from_data(TensorData::new(self.bias.clone(), [c]), &device)
            .reshape([1, c]);
        let logits = x
            .to_tensor::<AutoBackend>(&device)
            .matmul(self.weights.to_tensor::<AutoBackend>(&device))
            + bias;
        Matrix::from_tensor(activation::softmax(logits, 1))
    }
}

/// Loads the subject model of one epoch from its checkpoint file.
pub type SubjectCtor = fn(&Path) -> Result<Arc<dyn SubjectModel>>;

fn load_linear_softmax(path: &Path) -> Result<Arc<dyn SubjectModel>> {
    Ok(Arc::new(LinearSoftmax::from_file(path)?))
}

/// Name → constructor table.
#[derive(Clone)]
pub struct SubjectRegistry {
    ctors: HashMap<String, SubjectCtor>,
}

impl Default for SubjectRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("linear_softmax", load_linear_softmax);
        registry
    }
}

impl SubjectRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, ctor: SubjectCtor) {
        self.ctors.insert(name.to_string(), ctor);
    }

    pub fn resolve(&self, name: &str) -> Result<SubjectCtor> {
        self.ctors
            .get(name)
            .copied()
            .ok_or_else(|| VisError::UnknownSubjectModel(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ctors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Subject model of a given epoch.
pub trait SubjectSource {
    fn subject(&self, epoch: usize) -> Result<Arc<dyn SubjectModel>>;
}

/// Per-epoch checkpoints in the content directory, loaded once each.
pub struct CheckpointedSubjects {
    store: ContentStore,
    ctor: SubjectCtor,
    cache: DashMap<usize, Arc<dyn SubjectModel>>,
}

impl CheckpointedSubjects {
    pub fn new(store: ContentStore, ctor: SubjectCtor) -> Self {
        Self {
            store,
            ctor,
            cache: DashMap::new(),
        }
    }
}

impl SubjectSource for CheckpointedSubjects {
    fn subject(&self, epoch: usize) -> Result<Arc<dyn SubjectModel>> {
        if let Some(model) = self.cache.get(&epoch) {
            return Ok(Arc::clone(model.value()));
        }
        let path = self.store.subject_path(epoch);
        if !path.is_file() {
            return Err(VisError::MissingSubjectModel { epoch, path });
        }
        let model = (self.ctor)(&path)?;
        self.cache.insert(epoch, Arc::clone(&model));
        Ok(model)
    }
}

/// The same classifier for every epoch.
pub struct SharedSubject(pub Arc<dyn SubjectModel>);

impl SubjectSource for SharedSubject {
    fn subject(&self, _epoch: usize) -> Result<Arc<dyn SubjectModel>> {
        Ok(Arc::clone(&self.0))
    }
}
