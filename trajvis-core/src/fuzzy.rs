//! Spatial edges: the fuzzy simplicial set of one epoch.
//!
//! Pipeline position: Snapshot [N, D] → k-NN → (ρ, σ) per point →
//! directed memberships → fuzzy union → symmetric CSR graph [N, N].
//!
//! Per point i:
//!   ρᵢ  distance to the nearest neighbour (local connectivity radius)
//!   σᵢ  bandwidth solved by bisection so that
//!         Σⱼ exp(−max(0, d(i,j) − ρᵢ) / σᵢ) = log₂ k
//!
//! Membership i→j:  exp(−max(0, d(i,j) − ρᵢ) / σᵢ)
//! Fuzzy union:     p_ij = p_i→j + p_j→i − p_i→j · p_j→i
//!
//! The union is symmetric by construction, so the output CSR matrix
//! satisfies `p_ij == p_ji` exactly.

use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use crate::data::Matrix;
use crate::knn::{KnnConfig, KnnGraph, NearestNeighbors};

/// Bisection iterations for σ.
const SMOOTH_K_STEPS: usize = 64;
const SMOOTH_K_TOLERANCE: f32 = 1e-5;
/// σ never drops below this fraction of the mean neighbour distance.
const MIN_K_DIST_SCALE: f32 = 1e-3;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Neighbours per point (including the implicit self for log₂ k).
    pub n_neighbors: usize,
    pub knn: KnnConfig,
    /// Edges weaker than `max_weight / n_epochs` are dropped when the
    /// graph is flattened into an edge list.
    pub n_epochs: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            knn: KnnConfig::default(),
            n_epochs: 5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output types
// ─────────────────────────────────────────────────────────────────────────────

/// Directed, weighted edge list over sample indices.
#[derive(Debug, Clone, Default)]
pub struct EdgeList {
    pub heads: Vec<usize>,
    pub tails: Vec<usize>,
    pub weights: Vec<f32>,
}

impl EdgeList {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn push(&mut self, head: usize, tail: usize, weight: f32) {
        self.heads.push(head);
        self.tails.push(tail);
        self.weights.push(weight);
    }

    /// Shift every endpoint, used when epochs are stacked into one index space.
    pub fn offset(mut self, by: usize) -> Self {
        self.heads.iter_mut().for_each(|h| *h += by);
        self.tails.iter_mut().for_each(|t| *t += by);
        self
    }

    pub fn extend(&mut self, other: EdgeList) {
        self.heads.extend(other.heads);
        self.tails.extend(other.tails);
        self.weights.extend(other.weights);
    }
}

/// Symmetric fuzzy neighbour graph of one epoch plus the per-point
/// parameters reused by the temporal builder.
pub struct FuzzyGraph {
    pub matrix: CsMat<f32>,
    pub rhos: Vec<f32>,
    pub sigmas: Vec<f32>,
    pub knn: KnnGraph,
}

impl FuzzyGraph {
    pub fn n_points(&self) -> usize {
        self.rhos.len()
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    pub fn summary(&self) -> String {
        format!(
            "FuzzyGraph: N={}, k={}, nnz={}",
            self.n_points(),
            self.knn.k,
            self.nnz()
        )
    }

    /// Flatten to an edge list, dropping edges below `max / n_epochs`.
    pub fn edges(&self, n_epochs: usize) -> EdgeList {
        csr_edges(&self.matrix, n_epochs)
    }
}

/// Every stored entry of a CSR matrix with weight ≥ max / n_epochs.
pub fn csr_edges(matrix: &CsMat<f32>, n_epochs: usize) -> EdgeList {
    let max = matrix.data().iter().copied().fold(0.0f32, f32::max);
    let floor = if n_epochs > 0 { max / n_epochs as f32 } else { 0.0 };

    let mut edges = EdgeList::default();
    for (row, vec) in matrix.outer_iterator().enumerate() {
        for (col, &w) in vec.iter() {
            if w > 0.0 && w >= floor {
                edges.push(row, col, w);
            }
        }
    }
    edges
}

// ─────────────────────────────────────────────────────────────────────────────
// Membership machinery (shared with the temporal builder)
// ─────────────────────────────────────────────────────────────────────────────

/// Solve (ρ, σ) for every point from its sorted neighbour distances.
pub fn smooth_knn_dist(distances: &[Vec<f32>], k: usize) -> (Vec<f32>, Vec<f32>) {
    let target = (k.max(2) as f32).log2();
    let mean_all = {
        let (sum, count) = distances
            .iter()
            .flatten()
            .fold((0.0f64, 0usize), |(s, c), &d| (s + d as f64, c + 1));
        if count > 0 { (sum / count as f64) as f32 } else { 0.0 }
    };

    distances
        .par_iter()
        .map(|row| {
            let rho = row.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

            let (mut lo, mut hi, mut mid) = (0.0f32, f32::INFINITY, 1.0f32);
            for _ in 0..SMOOTH_K_STEPS {
                let psum: f32 = row
                    .iter()
                    .map(|&d| {
                        let gap = d - rho;
                        if gap > 0.0 { (-gap / mid).exp() } else { 1.0 }
                    })
                    .sum();

                if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                    break;
                }
                if psum > target {
                    hi = mid;
                    mid = (lo + hi) / 2.0;
                } else {
                    lo = mid;
                    mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
                }
            }

            let mean_row = if row.is_empty() {
                0.0
            } else {
                row.iter().sum::<f32>() / row.len() as f32
            };
            let floor = if rho > 0.0 { mean_row } else { mean_all } * MIN_K_DIST_SCALE;
            (rho, mid.max(floor))
        })
        .unzip()
}

/// Membership strength of an edge given the source point's (ρ, σ).
#[inline]
pub fn membership(dist: f32, rho: f32, sigma: f32) -> f32 {
    if dist - rho <= 0.0 || sigma <= 0.0 {
        1.0
    } else {
        (-(dist - rho) / sigma).exp()
    }
}

/// Fuzzy union of directed memberships into a symmetric CSR matrix [n, n].
///
/// Directed duplicates are collapsed first (max), then each undirected pair
/// gets `a + b − a·b`.
pub fn fuzzy_union(directed: &[(usize, usize, f32)], n: usize) -> CsMat<f32> {
    let arcs: DashMap<(usize, usize), f32> = DashMap::new();
    directed.par_iter().for_each(|&(i, j, w)| {
        if i == j || w <= 0.0 {
            return;
        }
        arcs.entry((i, j)).and_modify(|v| *v = v.max(w)).or_insert(w);
    });

    let undirected: DashMap<(usize, usize), f32> = DashMap::new();
    arcs.par_iter().for_each(|entry| {
        let (i, j) = *entry.key();
        let key = if i < j { (i, j) } else { (j, i) };
        if undirected.contains_key(&key) {
            return;
        }
        let a = arcs.get(&(i, j)).map(|v| *v).unwrap_or(0.0);
        let b = arcs.get(&(j, i)).map(|v| *v).unwrap_or(0.0);
        undirected.insert(key, a + b - a * b);
    });

    let mut tri = TriMat::new((n, n));
    for entry in undirected.iter() {
        let (i, j) = *entry.key();
        let w = *entry.value();
        if w > 0.0 {
            tri.add_triplet(i, j, w);
            tri.add_triplet(j, i, w);
        }
    }
    tri.to_csr()
}

// ─────────────────────────────────────────────────────────────────────────────
// Stage executor
// ─────────────────────────────────────────────────────────────────────────────

pub struct NeighborGraphBuilder {
    pub config: GraphConfig,
}

impl NeighborGraphBuilder {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(GraphConfig::default())
    }

    pub fn build(&self, representation: &Matrix) -> FuzzyGraph {
        let n = representation.rows;

        log::info!("╔═══════════════════════════════════════════════════════╗");
        log::info!("║  SPATIAL GRAPH                                        ║");
        log::info!("╚═══════════════════════════════════════════════════════╝");
        log::info!(
            "📐 [{}×{}] representation, k={}",
            n,
            representation.cols,
            self.config.n_neighbors
        );

        // The neighbour count includes the point itself; the search excludes it.
        let wanted = self.config.n_neighbors.saturating_sub(1).max(1);
        if n <= 1 {
            log::warn!("  ⚠ {} point(s): spatial graph is empty", n);
            return FuzzyGraph {
                matrix: CsMat::zero((n, n)),
                rhos: vec![0.0; n],
                sigmas: vec![1.0; n],
                knn: KnnGraph::empty(n),
            };
        }
        if wanted > n - 1 {
            log::warn!(
                "  ⚠ degenerate graph: {} points cannot supply {} neighbours, k → {}",
                n,
                wanted,
                n - 1
            );
        }

        let knn = NearestNeighbors::new(self.config.knn.clone()).search(representation, wanted);
        let (rhos, sigmas) = smooth_knn_dist(&knn.distances, knn.k + 1);
        log::debug!("  σ/ρ solved for {} points", n);

        let directed: Vec<(usize, usize, f32)> = knn
            .indices
            .par_iter()
            .zip(knn.distances.par_iter())
            .enumerate()
            .flat_map_iter(|(i, (idx, dist))| {
                let (rho, sigma) = (rhos[i], sigmas[i]);
                idx.iter()
                    .zip(dist)
                    .map(move |(&j, &d)| (i, j, membership(d, rho, sigma)))
                    .collect::<Vec<_>>()
            })
            .collect();

        let matrix = fuzzy_union(&directed, n);

        let graph = FuzzyGraph {
            matrix,
            rhos,
            sigmas,
            knn,
        };
        log::info!("  ✓ {}", graph.summary());
        graph
    }
}
