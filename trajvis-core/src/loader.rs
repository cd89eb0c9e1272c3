//! Batch sources feeding the trainer.
//!
//! [`EdgeLoader`] turns a sampled pass over an [`EdgeSet`] into tensor
//! batches of endpoint features; [`SequenceLoader`] shuffles per-sample
//! trajectories for the time-conditioned motion variant.

use std::sync::Arc;

use burn::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::data::Matrix;
use crate::error::{Result, VisError};
use crate::sampler::{EdgeSampler, EdgeSet, SamplerConfig, build_sampler};
use crate::trainer::BatchSource;

/// Sampled edges: features of both endpoints plus bookkeeping.
#[derive(Debug, Clone)]
pub struct EdgeBatch<B: Backend> {
    /// Head features [batch, D].
    pub to: Tensor<B, 2>,
    /// Tail features [batch, D].
    pub from: Tensor<B, 2>,
    pub to_idx: Vec<usize>,
    pub from_idx: Vec<usize>,
}

impl<B: Backend> EdgeBatch<B> {
    pub fn len(&self) -> usize {
        self.to_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_idx.is_empty()
    }
}

pub struct EdgeLoader {
    edges: EdgeSet,
    features: Arc<Matrix>,
    sampler: Box<dyn EdgeSampler>,
    rng: StdRng,
    batch_size: usize,
    n_samples: usize,
}

impl EdgeLoader {
    pub fn new(edges: EdgeSet, features: Arc<Matrix>, config: &SamplerConfig) -> Result<Self> {
        if let Some(&bad) = edges
            .heads
            .iter()
            .chain(edges.tails.iter())
            .find(|&&i| i >= features.rows)
        {
            return Err(VisError::Shape(format!(
                "edge endpoint {} outside {} feature rows",
                bad, features.rows
            )));
        }
        let sampler = build_sampler(&edges.probs, config.kind)
            .ok_or_else(|| VisError::EmptyTrainingSet("no edge survived pruning".into()))?;
        let n_samples = edges.n_samples(config.repeat).max(1);

        log::info!(
            "  • loader: {} edges ({} temporal), {} draws/pass, batch={}, sampler={}",
            edges.len(),
            edges.n_temporal(),
            n_samples,
            config.batch_size,
            sampler.name()
        );

        Ok(Self {
            edges,
            features,
            sampler,
            rng: StdRng::seed_from_u64(config.seed),
            batch_size: config.batch_size.max(1),
            n_samples,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_batches(&self) -> usize {
        self.n_samples.div_ceil(self.batch_size)
    }
}

fn gather<B: Backend>(
    edges: &EdgeSet,
    features: &Matrix,
    picked: &[usize],
    device: &B::Device,
) -> EdgeBatch<B> {
    let to_idx: Vec<usize> = picked.iter().map(|&e| edges.heads[e]).collect();
    let from_idx: Vec<usize> = picked.iter().map(|&e| edges.tails[e]).collect();

    let to = features.select_rows(&to_idx).to_tensor::<B>(device);
    let from = features.select_rows(&from_idx).to_tensor::<B>(device);

    EdgeBatch {
        to,
        from,
        to_idx,
        from_idx,
    }
}

impl<B: Backend> BatchSource<B> for EdgeLoader {
    type Batch = EdgeBatch<B>;

    fn epoch_batches<'a>(
        &'a mut self,
        device: &'a B::Device,
    ) -> Box<dyn Iterator<Item = EdgeBatch<B>> + 'a> {
        let EdgeLoader {
            edges,
            features,
            sampler,
            rng,
            batch_size,
            n_samples,
        } = self;
        let mut draws = sampler.draws(*n_samples, rng);
        let batch_size = *batch_size;

        Box::new(std::iter::from_fn(move || {
            let picked: Vec<usize> = draws.by_ref().take(batch_size).collect();
            if picked.is_empty() {
                return None;
            }
            Some(gather::<B>(edges, features, &picked, device))
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trajectories
// ─────────────────────────────────────────────────────────────────────────────

/// A batch of trajectories, [batch, T, D], with normalised times [batch, T].
#[derive(Debug, Clone)]
pub struct SequenceBatch<B: Backend> {
    pub x: Tensor<B, 3>,
    pub t: Tensor<B, 2>,
    pub idx: Vec<usize>,
}

/// Per-sample trajectories stored as [N, T, D] row-major.
pub struct SequenceLoader {
    data: Arc<Vec<f32>>,
    times: Vec<f32>,
    n: usize,
    steps: usize,
    dim: usize,
    batch_size: usize,
    rng: StdRng,
}

impl SequenceLoader {
    pub fn new(
        data: Arc<Vec<f32>>,
        times: Vec<f32>,
        shape: [usize; 3],
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        let [n, steps, dim] = shape;
        if data.len() != n * steps * dim || times.len() != steps {
            return Err(VisError::Shape(format!(
                "trajectory buffer {} / times {} do not match [{}, {}, {}]",
                data.len(),
                times.len(),
                n,
                steps,
                dim
            )));
        }
        if n == 0 {
            return Err(VisError::EmptyTrainingSet("no trajectories".into()));
        }
        Ok(Self {
            data,
            times,
            n,
            steps,
            dim,
            batch_size: batch_size.max(1),
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

impl<B: Backend> BatchSource<B> for SequenceLoader {
    type Batch = SequenceBatch<B>;

    fn epoch_batches<'a>(
        &'a mut self,
        device: &'a B::Device,
    ) -> Box<dyn Iterator<Item = SequenceBatch<B>> + 'a> {
        let mut order: Vec<usize> = (0..self.n).collect();
        order.shuffle(&mut self.rng);

        let (steps, dim) = (self.steps, self.dim);
        let stride = steps * dim;
        let data = Arc::clone(&self.data);
        let times = self.times.clone();

        let chunks: Vec<Vec<usize>> = order.chunks(self.batch_size).map(|c| c.to_vec()).collect();
        Box::new(chunks.into_iter().map(move |idx| {
            let b = idx.len();
            let mut x = Vec::with_capacity(b * stride);
            let mut t = Vec::with_capacity(b * steps);
            for &i in &idx {
                x.extend_from_slice(&data[i * stride..(i + 1) * stride]);
                t.extend_from_slice(&times);
            }
            SequenceBatch {
                x: Tensor::<B, 3>::from_data(TensorData::new(x, [b, steps, dim]), device),
                t: Tensor::<B, 2>::from_data(TensorData::new(t, [b, steps]), device),
                idx,
            }
        }))
    }
}
