// trajvis-core/src/distance.rs
use burn::prelude::*;

/// Squared Euclidean distance between two rows.
#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

/// Row-wise squared distance between paired rows: ‖aᵢ − bᵢ‖² → [N]
pub fn paired_squared<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 1> {
    (a - b).powf_scalar(2.0).sum_dim(1).squeeze_dim::<1>(1)
}

