//! Temporal edges: linking samples across epochs.
//!
//! Epochs are stacked into one index space (`offsets[t] + i`), so temporal
//! edges can be concatenated with the offset spatial edges of every epoch.
//!
//! Two policies:
//!   • Local  – "fiber" edges. Sample i at epoch t links to sample i at each
//!              epoch t' within the window. Membership uses unit bandwidth
//!              and zero radius, i.e. exp(−d).
//!   • Global – one k-NN over the union of all epochs, keeping only
//!              cross-epoch neighbours and weighting them with the (ρ, σ)
//!              of each epoch's spatial graph.
//!
//! Both finish with the same fuzzy union as the spatial graph.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::Matrix;
use crate::distance::euclidean;
use crate::error::{Result, VisError};
use crate::fuzzy::{EdgeList, FuzzyGraph, csr_edges, fuzzy_union, membership};
use crate::knn::{KnnConfig, NearestNeighbors};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalPolicy {
    /// Same sample across nearby epochs; preferred with few epochs.
    #[default]
    Local,
    Global,
}

impl std::fmt::Display for TemporalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TemporalPolicy::Local => write!(f, "Local"),
            TemporalPolicy::Global => write!(f, "Global"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub policy: TemporalPolicy,
    /// Local: maximum epoch distance |t − t'| linked per fiber.
    pub window: usize,
    /// Neighbours kept per point (Local: per fiber, Global: cross-epoch).
    pub n_neighbors: usize,
    /// Same role as the spatial `n_epochs`: prune below max / n_epochs.
    pub n_epochs: usize,
    pub knn: KnnConfig,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            policy: TemporalPolicy::Local,
            window: 3,
            n_neighbors: 15,
            n_epochs: 5,
            knn: KnnConfig::default(),
        }
    }
}

/// Stacking of several epochs into one index space.
#[derive(Debug, Clone)]
pub struct EpochStack {
    /// First stacked index of every epoch.
    pub offsets: Vec<usize>,
    pub counts: Vec<usize>,
}

impl EpochStack {
    pub fn new(counts: Vec<usize>) -> Self {
        let offsets = counts
            .iter()
            .scan(0usize, |acc, &c| {
                let start = *acc;
                *acc += c;
                Some(start)
            })
            .collect();
        Self { offsets, counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn n_epochs(&self) -> usize {
        self.counts.len()
    }

    /// (epoch slot, local index) of a stacked index.
    pub fn locate(&self, global: usize) -> (usize, usize) {
        let slot = self.offsets.partition_point(|&o| o <= global).saturating_sub(1);
        (slot, global - self.offsets[slot])
    }
}

pub struct TemporalGraphBuilder {
    pub config: TemporalConfig,
}

impl TemporalGraphBuilder {
    pub fn new(config: TemporalConfig) -> Self {
        Self { config }
    }

    /// Temporal edges over stacked epochs.
    ///
    /// `spatial` must hold the spatial graph of each snapshot in the same
    /// order; their (ρ, σ) feed the Global policy.
    pub fn build(&self, snapshots: &[&Matrix], spatial: &[&FuzzyGraph]) -> Result<EdgeList> {
        if snapshots.len() != spatial.len() {
            return Err(VisError::Shape(format!(
                "{} snapshots but {} spatial graphs",
                snapshots.len(),
                spatial.len()
            )));
        }
        let stack = EpochStack::new(snapshots.iter().map(|m| m.rows).collect());

        log::info!("╔═══════════════════════════════════════════════════════╗");
        log::info!("║  TEMPORAL GRAPH                                       ║");
        log::info!("╚═══════════════════════════════════════════════════════╝");
        log::info!(
            "  • policy={}, epochs={}, stacked points={}",
            self.config.policy,
            stack.n_epochs(),
            stack.total()
        );

        if stack.n_epochs() < 2 || stack.total() < 2 {
            log::info!("  ✓ single epoch: no temporal edges");
            return Ok(EdgeList::default());
        }

        let directed = match self.config.policy {
            TemporalPolicy::Local => self.local_memberships(snapshots, &stack),
            TemporalPolicy::Global => self.global_memberships(snapshots, spatial, &stack)?,
        };
        let matrix = fuzzy_union(&directed, stack.total());
        let edges = csr_edges(&matrix, self.config.n_epochs);

        log::info!("  ✓ {} temporal edges", edges.len());
        Ok(edges)
    }

    /// Fiber memberships: each sample only ever meets itself at other epochs.
    fn local_memberships(
        &self,
        snapshots: &[&Matrix],
        stack: &EpochStack,
    ) -> Vec<(usize, usize, f32)> {
        let window = self.config.window.max(1);
        let k = self.config.n_neighbors.max(1);

        (0..stack.total())
            .into_par_iter()
            .flat_map_iter(|g| {
                let (t, i) = stack.locate(g);
                let x = snapshots[t].row(i);

                let lo = t.saturating_sub(window);
                let hi = (t + window).min(stack.n_epochs() - 1);
                let mut fiber: Vec<(usize, f32)> = (lo..=hi)
                    .filter(|&s| s != t && i < snapshots[s].rows)
                    .map(|s| (stack.offsets[s] + i, euclidean(x, snapshots[s].row(i))))
                    .collect();
                fiber.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));
                fiber.truncate(k);

                fiber
                    .into_iter()
                    .map(move |(h, d)| (g, h, membership(d, 0.0, 1.0)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Cross-epoch neighbours from one search over the stacked features.
    fn global_memberships(
        &self,
        snapshots: &[&Matrix],
        spatial: &[&FuzzyGraph],
        stack: &EpochStack,
    ) -> Result<Vec<(usize, usize, f32)>> {
        let stacked = Matrix::vstack(snapshots)?;
        let k = self.config.n_neighbors.max(1);

        // Same-epoch hits take slots in the search, so look further out.
        let search_k = (2 * k).min(stack.total() - 1);
        let knn = NearestNeighbors::new(self.config.knn.clone()).search(&stacked, search_k);

        let rhos: Vec<f32> = spatial.iter().flat_map(|g| g.rhos.iter().copied()).collect();
        let sigmas: Vec<f32> = spatial
            .iter()
            .flat_map(|g| g.sigmas.iter().copied())
            .collect();
        if rhos.len() != stack.total() {
            return Err(VisError::Shape(format!(
                "spatial graphs cover {} points, stack has {}",
                rhos.len(),
                stack.total()
            )));
        }

        let starved = std::sync::atomic::AtomicUsize::new(0);
        let directed: Vec<(usize, usize, f32)> = knn
            .indices
            .par_iter()
            .zip(knn.distances.par_iter())
            .enumerate()
            .flat_map_iter(|(g, (idx, dist))| {
                let (t, _) = stack.locate(g);
                let picked: Vec<(usize, usize, f32)> = idx
                    .iter()
                    .zip(dist)
                    .filter(|(j, _)| stack.locate(**j).0 != t)
                    .take(k)
                    .map(|(&j, &d)| (g, j, membership(d, rhos[g], sigmas[g])))
                    .collect();
                if picked.is_empty() {
                    starved.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                picked
            })
            .collect();

        let starved = starved.into_inner();
        if starved > 0 {
            log::debug!(
                "  {} points found no cross-epoch neighbour (spatial-only supervision)",
                starved
            );
        }
        Ok(directed)
    }
}

/// Fraction of each point's k-NN set that survives between two snapshots
/// of the same samples: |kNN_prev(i) ∩ kNN_curr(i)| / k.
///
/// Without a previous snapshot every rate is 0.
pub fn neighbor_preserving_rate(
    prev: Option<&Matrix>,
    curr: &Matrix,
    k: usize,
    knn: &KnnConfig,
) -> Result<Vec<f32>> {
    let Some(prev) = prev else {
        return Ok(vec![0.0; curr.rows]);
    };
    if prev.rows != curr.rows {
        return Err(VisError::Shape(format!(
            "neighbour preservation needs equal sample counts ({} vs {})",
            prev.rows, curr.rows
        )));
    }

    let searcher = NearestNeighbors::new(knn.clone());
    let now = searcher.search(curr, k);
    let before = searcher.search(prev, k);
    let k_eff = now.k.max(1) as f32;

    Ok(now
        .indices
        .par_iter()
        .zip(before.indices.par_iter())
        .map(|(a, b)| a.iter().filter(|j| b.contains(j)).count() as f32 / k_eff)
        .collect())
}
