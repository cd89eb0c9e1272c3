//! Approximate k-nearest-neighbour search.
//!
//! Random-projection forest for the initial candidate lists, refined by
//! nearest-neighbour descent ("a neighbour of my neighbour is probably my
//! neighbour"). Small inputs fall back to an exact parallel scan because the
//! forest cannot beat O(N²) there.
//!
//! Sizing follows the usual heuristics:
//!   trees      = min(64, 5 + round(√N / 20))
//!   iterations = max(5, round(log₂ N))
//!
//! Neighbour lists never contain the query point itself, and are sorted by
//! ascending Euclidean distance.

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::Matrix;
use crate::distance::squared_euclidean;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnnMethod {
    /// Exact scan below `exact_threshold` points, descent above it.
    #[default]
    Auto,
    Exact,
    Descent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnConfig {
    pub method: KnnMethod,
    /// Override for the forest size; `None` uses the √N heuristic.
    pub n_trees: Option<usize>,
    /// Override for the descent iterations; `None` uses log₂ N.
    pub n_iters: Option<usize>,
    /// Cap on new/old candidates sampled per point and iteration.
    pub max_candidates: usize,
    /// Stop when fewer than `delta·k·N` heap updates happen in an iteration.
    pub delta: f32,
    pub exact_threshold: usize,
    pub seed: u64,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            method: KnnMethod::Auto,
            n_trees: None,
            n_iters: None,
            max_candidates: 60,
            delta: 0.001,
            exact_threshold: 256,
            seed: 42,
        }
    }
}

pub fn default_n_trees(n: usize) -> usize {
    64.min(5 + ((n as f64).sqrt() / 20.0).round() as usize)
}

pub fn default_n_iters(n: usize) -> usize {
    5.max((n.max(1) as f64).log2().round() as usize)
}

/// k-NN lists for every point, self excluded.
#[derive(Debug, Clone)]
pub struct KnnGraph {
    pub k: usize,
    pub indices: Vec<Vec<usize>>,
    pub distances: Vec<Vec<f32>>,
}

impl KnnGraph {
    pub fn n_points(&self) -> usize {
        self.indices.len()
    }

    pub fn empty(n: usize) -> Self {
        Self {
            k: 0,
            indices: vec![Vec::new(); n],
            distances: vec![Vec::new(); n],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bounded neighbour heap
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity neighbour list kept sorted by squared distance.
/// The flag marks entries not yet used in a local join.
#[derive(Debug, Clone)]
struct NeighborHeap {
    k: usize,
    items: Vec<(OrderedFloat<f32>, usize, bool)>,
}

impl NeighborHeap {
    fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k + 1),
        }
    }

    fn worst(&self) -> f32 {
        if self.items.len() < self.k {
            f32::INFINITY
        } else {
            self.items.last().map(|e| e.0.0).unwrap_or(f32::INFINITY)
        }
    }

    fn push(&mut self, dist: f32, idx: usize, is_new: bool) -> bool {
        if self.k == 0 || dist >= self.worst() || self.items.iter().any(|e| e.1 == idx) {
            return false;
        }
        let key = OrderedFloat(dist);
        let pos = self.items.partition_point(|e| e.0 <= key);
        self.items.insert(pos, (key, idx, is_new));
        self.items.truncate(self.k);
        true
    }

    fn mark_old(&mut self, idx: usize) {
        if let Some(e) = self.items.iter_mut().find(|e| e.1 == idx) {
            e.2 = false;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search executor
// ─────────────────────────────────────────────────────────────────────────────

pub struct NearestNeighbors {
    pub config: KnnConfig,
}

impl NearestNeighbors {
    pub fn new(config: KnnConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(KnnConfig::default())
    }

    /// k nearest neighbours of every row. `k` is shrunk to N−1 when the
    /// matrix is too small.
    pub fn search(&self, data: &Matrix, k: usize) -> KnnGraph {
        let n = data.rows;
        let k = k.min(n.saturating_sub(1));
        if k == 0 {
            return KnnGraph::empty(n);
        }

        let exact = match self.config.method {
            KnnMethod::Exact => true,
            KnnMethod::Descent => false,
            KnnMethod::Auto => n <= self.config.exact_threshold,
        };

        if exact {
            log::debug!("kNN: exact scan over {} points (k={})", n, k);
            exact_knn(data, k)
        } else {
            self.descent(data, k)
        }
    }

    fn descent(&self, data: &Matrix, k: usize) -> KnnGraph {
        let n = data.rows;
        let n_trees = self.config.n_trees.unwrap_or_else(|| default_n_trees(n));
        let n_iters = self.config.n_iters.unwrap_or_else(|| default_n_iters(n));
        let leaf_size = k.max(10);
        let max_candidates = self.config.max_candidates.max(k);

        log::debug!(
            "kNN: NN-descent over {} points (k={}, trees={}, iters={}, leaf={})",
            n,
            k,
            n_trees,
            n_iters,
            leaf_size
        );

        let mut heaps: Vec<NeighborHeap> = (0..n).map(|_| NeighborHeap::new(k)).collect();

        // ── Step 1: forest initialisation ────────────────────────────────────
        let leaves: Vec<Vec<usize>> = (0..n_trees)
            .into_par_iter()
            .flat_map(|t| {
                let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(t as u64));
                rp_tree_leaves(data, leaf_size, &mut rng)
            })
            .collect();

        let leaf_pairs: Vec<(usize, usize, f32)> = leaves
            .par_iter()
            .flat_map_iter(|leaf| {
                let mut out = Vec::with_capacity(leaf.len() * leaf.len() / 2);
                for a in 0..leaf.len() {
                    for b in (a + 1)..leaf.len() {
                        let (p, q) = (leaf[a], leaf[b]);
                        out.push((p, q, squared_euclidean(data.row(p), data.row(q))));
                    }
                }
                out
            })
            .collect();
        for (p, q, d) in leaf_pairs {
            heaps[p].push(d, q, true);
            heaps[q].push(d, p, true);
        }

        // Points the forest left short get random fill.
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ 0x9e37_79b9);
        for i in 0..n {
            let mut attempts = 0;
            while heaps[i].items.len() < k && attempts < 4 * k {
                let j = rng.random_range(0..n);
                if j != i {
                    let d = squared_euclidean(data.row(i), data.row(j));
                    heaps[i].push(d, j, true);
                }
                attempts += 1;
            }
            if heaps[i].items.len() < k {
                for j in (0..n).filter(|&j| j != i) {
                    heaps[i].push(squared_euclidean(data.row(i), data.row(j)), j, true);
                }
            }
        }

        // ── Step 2: descent iterations ───────────────────────────────────────
        for it in 0..n_iters {
            let mut new_cand: Vec<Vec<usize>> = vec![Vec::new(); n];
            let mut old_cand: Vec<Vec<usize>> = vec![Vec::new(); n];
            for (i, heap) in heaps.iter().enumerate() {
                for &(_, j, is_new) in &heap.items {
                    if is_new {
                        new_cand[i].push(j);
                        new_cand[j].push(i);
                    } else {
                        old_cand[i].push(j);
                        old_cand[j].push(i);
                    }
                }
            }
            for cands in new_cand.iter_mut().chain(old_cand.iter_mut()) {
                cands.sort_unstable();
                cands.dedup();
                if cands.len() > max_candidates {
                    cands.shuffle(&mut rng);
                    cands.truncate(max_candidates);
                }
            }
            for (i, cands) in new_cand.iter().enumerate() {
                for &j in cands {
                    heaps[i].mark_old(j);
                }
            }

            let thresholds: Vec<f32> = heaps.iter().map(|h| h.worst()).collect();
            let updates: Vec<(usize, usize, f32)> = (0..n)
                .into_par_iter()
                .flat_map_iter(|i| {
                    let new = &new_cand[i];
                    let old = &old_cand[i];
                    let mut out = Vec::new();
                    for (a, &p) in new.iter().enumerate() {
                        for &q in new[a + 1..].iter().chain(old.iter()) {
                            if p == q {
                                continue;
                            }
                            let d = squared_euclidean(data.row(p), data.row(q));
                            if d < thresholds[p] || d < thresholds[q] {
                                out.push((p, q, d));
                            }
                        }
                    }
                    out
                })
                .collect();

            let mut changed = 0usize;
            for (p, q, d) in updates {
                changed += heaps[p].push(d, q, true) as usize;
                changed += heaps[q].push(d, p, true) as usize;
            }
            log::trace!("  NN-descent iter {}: {} heap updates", it, changed);
            if (changed as f32) <= self.config.delta * (k * n) as f32 {
                log::debug!("  NN-descent converged after {} iterations", it + 1);
                break;
            }
        }

        let (indices, distances) = heaps
            .into_iter()
            .map(|h| {
                h.items
                    .into_iter()
                    .map(|(d, j, _)| (j, d.0.sqrt()))
                    .unzip::<usize, f32, Vec<usize>, Vec<f32>>()
            })
            .unzip();

        KnnGraph {
            k,
            indices,
            distances,
        }
    }
}

/// Exact k-NN by parallel full scan.
pub fn exact_knn(data: &Matrix, k: usize) -> KnnGraph {
    let n = data.rows;
    let k = k.min(n.saturating_sub(1));
    if k == 0 {
        return KnnGraph::empty(n);
    }
    let (indices, distances) = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut scored: Vec<(OrderedFloat<f32>, usize)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (OrderedFloat(squared_euclidean(data.row(i), data.row(j))), j))
                .collect();
            scored.select_nth_unstable(k - 1);
            scored.truncate(k);
            scored.sort_unstable();
            scored
                .into_iter()
                .map(|(d, j)| (j, d.0.sqrt()))
                .unzip::<usize, f32, Vec<usize>, Vec<f32>>()
        })
        .unzip();
    KnnGraph {
        k,
        indices,
        distances,
    }
}

/// Leaves of one random-projection tree (Euclidean hyperplane splits).
fn rp_tree_leaves(data: &Matrix, leaf_size: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut leaves = Vec::new();
    let mut stack = vec![(0..data.rows).collect::<Vec<usize>>()];

    while let Some(node) = stack.pop() {
        if node.len() <= leaf_size {
            leaves.push(node);
            continue;
        }

        let a = node[rng.random_range(0..node.len())];
        let mut b = node[rng.random_range(0..node.len())];
        if a == b {
            b = node[(node.iter().position(|&x| x == a).unwrap_or(0) + 1) % node.len()];
        }
        let (xa, xb) = (data.row(a), data.row(b));
        let normal: Vec<f32> = xa.iter().zip(xb).map(|(p, q)| p - q).collect();
        let offset: f32 = -normal
            .iter()
            .zip(xa.iter().zip(xb))
            .map(|(h, (p, q))| h * (p + q) * 0.5)
            .sum::<f32>();

        let mut left = Vec::with_capacity(node.len() / 2);
        let mut right = Vec::with_capacity(node.len() / 2);
        for &i in &node {
            let margin = offset
                + normal
                    .iter()
                    .zip(data.row(i))
                    .map(|(h, x)| h * x)
                    .sum::<f32>();
            if margin > 0.0 || (margin == 0.0 && rng.random_bool(0.5)) {
                left.push(i);
            } else {
                right.push(i);
            }
        }

        // Coincident points: fall back to a random halving.
        if left.is_empty() || right.is_empty() {
            let mut all = node;
            all.shuffle(rng);
            let mid = all.len() / 2;
            right = all.split_off(mid);
            left = all;
        }
        stack.push(left);
        stack.push(right);
    }
    leaves
}
