//! Synthetic runs shared by the pipeline tests.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use trajvis_core::data::Matrix;
use trajvis_core::model::ModelConfig;
use trajvis_core::trainer::{LrSchedule, TrainConfig};

use crate::config::VisConfig;
use crate::subject::LinearSoftmax;

/// Two clusters at ±`separation` on every axis, labels 0 then 1.
pub fn two_clusters(n: usize, dim: usize, separation: f32, seed: u64) -> (Matrix, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 0.3).unwrap();
    let half = n / 2;
    let mut data = Vec::with_capacity(n * dim);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let (centre, label) = if i < half { (-separation, 0) } else { (separation, 1) };
        data.extend((0..dim).map(|_| centre + normal.sample(&mut rng)));
        labels.push(label);
    }
    (Matrix::new(data, n, dim).unwrap(), labels)
}

/// `epochs` snapshots of the same samples, each a small Gaussian step away
/// from the one before.
pub fn drifting(base: &Matrix, epochs: usize, step: f32, seed: u64) -> Vec<Matrix> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, step).unwrap();
    let mut out = vec![base.clone()];
    for _ in 1..epochs {
        let prev = out.last().unwrap();
        let data = prev.data.iter().map(|v| v + normal.sample(&mut rng)).collect();
        out.push(Matrix::new(data, prev.rows, prev.cols).unwrap());
    }
    out
}

/// Classifies by the sign of the feature sum: class 1 when positive.
pub fn sign_classifier(dim: usize, scale: f32) -> LinearSoftmax {
    let mut weights = Vec::with_capacity(dim * 2);
    for _ in 0..dim {
        weights.push(-scale);
        weights.push(scale);
    }
    LinearSoftmax::new(Matrix::new(weights, dim, 2).unwrap(), vec![0.0, 0.0]).unwrap()
}

/// Small, fast configuration for chained runs over `dim`-wide snapshots.
pub fn quick_config(content: &std::path::Path, dim: usize) -> VisConfig {
    let mut config = VisConfig {
        content_path: content.to_path_buf(),
        resolution: 10,
        projection_batch: 64,
        quality_k: 5,
        model: Some(ModelConfig {
            encoder_dims: vec![dim, 64, 32, 2],
            decoder_dims: vec![2, 32, 64, dim],
            ..ModelConfig::default()
        }),
        train: TrainConfig {
            patience: 3,
            tolerance: 1e-3,
            max_epochs: 8,
            ..TrainConfig::fixed(0.01, 8, LrSchedule::Constant)
        },
        ..VisConfig::default()
    };
    config.sampler.batch_size = 200;
    config.graph.n_neighbors = 10;
    config
}

/// Mean Euclidean distance between rows `a[i]` and `b[i]`.
pub fn mean_paired_distance(a: &Matrix, b: &Matrix) -> f32 {
    let total: f32 = (0..a.rows)
        .map(|i| trajvis_core::distance::euclidean(a.row(i), b.row(i)))
        .sum();
    total / a.rows as f32
}

/// Mean Euclidean distance over all distinct pairs of rows.
pub fn mean_pairwise_distance(m: &Matrix) -> f32 {
    let mut total = 0.0f32;
    let mut count = 0usize;
    for i in 0..m.rows {
        for j in (i + 1)..m.rows {
            total += trajvis_core::distance::euclidean(m.row(i), m.row(j));
            count += 1;
        }
    }
    total / count.max(1) as f32
}

pub fn centroid(m: &Matrix, rows: &[usize]) -> Vec<f32> {
    let mut c = vec![0.0f32; m.cols];
    for &i in rows {
        for (acc, v) in c.iter_mut().zip(m.row(i)) {
            *acc += v;
        }
    }
    c.iter_mut().for_each(|v| *v /= rows.len().max(1) as f32);
    c
}
