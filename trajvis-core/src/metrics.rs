//! Neighbourhood quality of a projection.
//!
//! Trustworthiness penalises 2-D neighbours that are far away in high-D;
//! continuity penalises high-D neighbours lost in 2-D. Both are 1 for a
//! perfect neighbourhood match.

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::Matrix;
use crate::distance::squared_euclidean;
use crate::error::{Result, VisError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighborQuality {
    pub trustworthiness: f32,
    pub continuity: f32,
}

/// Rank-based trustworthiness/continuity from precomputed neighbour lists.
///
/// Each list is sorted by distance; its length may exceed `k`, in which
/// case ranks beyond `k` come from the longer list and points missing from
/// it count as rank `len + 1`.
pub fn neighbor_quality(high: &[Vec<usize>], low: &[Vec<usize>], k: usize) -> NeighborQuality {
    let n = high.len();
    let k = high
        .iter()
        .chain(low.iter())
        .map(|l| l.len())
        .min()
        .unwrap_or(0)
        .min(k);
    let normalizer = (n * k) as f64 * (2.0 * n as f64 - 3.0 * k as f64 - 1.0);
    if k == 0 || normalizer <= 0.0 {
        return NeighborQuality {
            trustworthiness: 1.0,
            continuity: 1.0,
        };
    }

    let penalty = |a: &[usize], b: &[usize]| -> f64 {
        // Points in the top-k of `a` missing from the top-k of `b`, ranked in `b`.
        let a_top = &a[..k];
        let b_top = &b[..k];
        a_top
            .iter()
            .filter(|j| !b_top.contains(j))
            .map(|j| match b.iter().position(|x| x == j) {
                Some(p) => (p + 1) as f64 - k as f64,
                None => (b.len() + 1) as f64 - k as f64,
            })
            .sum()
    };

    let (trust, cont) = high
        .iter()
        .zip(low)
        .fold((0.0f64, 0.0f64), |(t, c), (h, l)| {
            (t + penalty(l, h), c + penalty(h, l))
        });

    NeighborQuality {
        trustworthiness: (1.0 - 2.0 / normalizer * trust) as f32,
        continuity: (1.0 - 2.0 / normalizer * cont) as f32,
    }
}

/// Squared distances from row `i` to every row; `i` itself is +∞.
fn row_distances(data: &Matrix, i: usize) -> Vec<OrderedFloat<f32>> {
    let anchor = data.row(i);
    (0..data.rows)
        .map(|j| {
            if j == i {
                OrderedFloat(f32::INFINITY)
            } else {
                OrderedFloat(squared_euclidean(anchor, data.row(j)))
            }
        })
        .collect()
}

/// The `k` nearest indices, ordered by (distance, index).
fn top_k(dist: &[OrderedFloat<f32>], k: usize) -> Vec<usize> {
    let mut scored: Vec<(OrderedFloat<f32>, usize)> =
        dist.iter().copied().zip(0..dist.len()).collect();
    scored.select_nth_unstable(k - 1);
    scored.truncate(k);
    scored.sort_unstable();
    scored.into_iter().map(|(_, j)| j).collect()
}

/// Penalty of the points in `a_top` missing from `b_top`, ranked by
/// counting the points ahead of them in `b_dist`.
fn streamed_penalty(
    a_top: &[usize],
    b_top: &[usize],
    b_dist: &[OrderedFloat<f32>],
    k: usize,
) -> f64 {
    a_top
        .iter()
        .filter(|j| !b_top.contains(j))
        .map(|&j| {
            let key = (b_dist[j], j);
            let ahead = b_dist
                .iter()
                .enumerate()
                .filter(|&(m, &d)| (d, m) < key)
                .count();
            (ahead + 1) as f64 - k as f64
        })
        .sum()
}

/// Compute both measures directly from a representation and its projection.
///
/// Rows are processed one at a time, so memory stays linear in N; a rank
/// outside the top-k is found by counting the points closer than it.
pub fn projection_quality(
    representation: &Matrix,
    projection: &Matrix,
    k: usize,
) -> Result<NeighborQuality> {
    if representation.rows != projection.rows {
        return Err(VisError::Shape(format!(
            "{} representations vs {} projected points",
            representation.rows, projection.rows
        )));
    }
    let n = representation.rows;
    let k = k.min(n.saturating_sub(1));
    let normalizer = (n * k) as f64 * (2.0 * n as f64 - 3.0 * k as f64 - 1.0);
    if k == 0 || normalizer <= 0.0 {
        return Ok(NeighborQuality {
            trustworthiness: 1.0,
            continuity: 1.0,
        });
    }

    let (trust, cont) = (0..n)
        .into_par_iter()
        .map(|i| {
            let high = row_distances(representation, i);
            let low = row_distances(projection, i);
            let (high_top, low_top) = (top_k(&high, k), top_k(&low, k));
            (
                streamed_penalty(&low_top, &high_top, &high, k),
                streamed_penalty(&high_top, &low_top, &low, k),
            )
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

    Ok(NeighborQuality {
        trustworthiness: (1.0 - 2.0 / normalizer * trust) as f32,
        continuity: (1.0 - 2.0 / normalizer * cont) as f32,
    })
}
