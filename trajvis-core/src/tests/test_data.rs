//! Synthetic inputs shared by the core tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::data::Matrix;

/// Isotropic Gaussian blobs, `per_cluster` points around each centre.
/// Returns the points and their cluster labels.
pub fn gaussian_blobs(
    centers: &[Vec<f32>],
    per_cluster: usize,
    std: f32,
    seed: u64,
) -> (Matrix, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, std).unwrap();
    let mut rows = Vec::with_capacity(centers.len() * per_cluster);
    let mut labels = Vec::with_capacity(centers.len() * per_cluster);
    for (c, center) in centers.iter().enumerate() {
        for _ in 0..per_cluster {
            rows.push(center.iter().map(|m| m + normal.sample(&mut rng)).collect());
            labels.push(c);
        }
    }
    (Matrix::from_rows(&rows).unwrap(), labels)
}

/// Two clusters at ±`separation` on every axis.
pub fn two_clusters(n: usize, dim: usize, separation: f32, seed: u64) -> (Matrix, Vec<usize>) {
    let centers = vec![vec![-separation; dim], vec![separation; dim]];
    gaussian_blobs(&centers, n / 2, 0.3, seed)
}

/// Uniform points in [0, 1)^dim.
pub fn uniform(n: usize, dim: usize, seed: u64) -> Matrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..n * dim).map(|_| rng.random::<f32>()).collect();
    Matrix::new(data, n, dim).unwrap()
}

/// The same samples observed over `epochs` snapshots, each a small random
/// step away from the previous one.
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

/// Trajectories [n, steps, dim] flattened row-major: a per-sample start
/// point moving along a per-sample direction with varying speed.
pub fn trajectories(n: usize, steps: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(n * steps * dim);
    for _ in 0..n {
        let start: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
        let dir: Vec<f32> = (0..dim).map(|_| rng.random_range(-0.3..0.3)).collect();
        let mut pos = start;
        for s in 0..steps {
            out.extend_from_slice(&pos);
            let speed = 1.0 + (s % 3) as f32;
            for (p, d) in pos.iter_mut().zip(&dir) {
                *p += d * speed;
            }
        }
    }
    out
}
