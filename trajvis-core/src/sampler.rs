//! Edge sampling for embedding training.
//!
//! # Overview
//!
//! Spatial and temporal edges are concatenated into one [`EdgeSet`],
//! normalised by the global maximum into (0, 1], and pruned at
//! `prune_threshold`. One training pass draws
//!
//! ```text
//! n_samples = ⌊ Σ S · pᵢ ⌋
//! ```
//!
//! edges with replacement, proportional to their probability, so denser
//! edges are revisited more often.
//!
//! # Samplers
//!
//! - [`InMemorySampler`]: materialises the whole index vector of a pass.
//! - [`StreamingSampler`]: Vose alias table, draws lazily in O(1) each.
//!
//! Above [`STREAMING_THRESHOLD`] edges the in-memory path would need index
//! tensors larger than categorical samplers accept, so [`SamplerKind::Auto`]
//! switches to streaming.

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::fuzzy::EdgeList;

/// 2^24 edges.
pub const STREAMING_THRESHOLD: usize = 1 << 24;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerKind {
    #[default]
    Auto,
    InMemory,
    Streaming,
}

impl std::fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SamplerKind::Auto => write!(f, "Auto"),
            SamplerKind::InMemory => write!(f, "InMemory"),
            SamplerKind::Streaming => write!(f, "Streaming"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Per-edge repetition factor S.
    pub repeat: f32,
    pub prune_threshold: f32,
    pub kind: SamplerKind,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            repeat: 5.0,
            prune_threshold: 1e-3,
            kind: SamplerKind::Auto,
            batch_size: 1000,
            seed: 42,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Edge set
// ─────────────────────────────────────────────────────────────────────────────

/// Sampling distribution over spatial + temporal edges.
#[derive(Debug, Clone, Default)]
pub struct EdgeSet {
    pub heads: Vec<usize>,
    pub tails: Vec<usize>,
    pub probs: Vec<f32>,
    pub is_temporal: Vec<bool>,
}

impl EdgeSet {
    /// Concatenate, normalise by the max and prune.
    pub fn assemble(spatial: EdgeList, temporal: EdgeList, prune_threshold: f32) -> Self {
        let n_spatial = spatial.len();
        let n_total = n_spatial + temporal.len();
        let max = spatial
            .weights
            .iter()
            .chain(temporal.weights.iter())
            .copied()
            .fold(0.0f32, f32::max);

        let mut set = EdgeSet::default();
        if max <= 0.0 {
            return set;
        }

        let heads = spatial.heads.into_iter().chain(temporal.heads);
        let tails = spatial.tails.into_iter().chain(temporal.tails);
        let weights = spatial.weights.into_iter().chain(temporal.weights);
        for (pos, ((h, t), w)) in heads.zip(tails).zip(weights).enumerate() {
            let p = w / max;
            if p > prune_threshold {
                set.heads.push(h);
                set.tails.push(t);
                set.probs.push(p.min(1.0));
                set.is_temporal.push(pos >= n_spatial);
            }
        }

        log::debug!(
            "EdgeSet: {} edges kept ({} temporal), {} pruned",
            set.len(),
            set.n_temporal(),
            n_total - set.len()
        );
        set
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn n_temporal(&self) -> usize {
        self.is_temporal.iter().filter(|&&t| t).count()
    }

    /// ⌊ Σ S·pᵢ ⌋
    pub fn n_samples(&self, repeat: f32) -> usize {
        self.probs
            .iter()
            .map(|&p| (repeat * p) as f64)
            .sum::<f64>()
            .floor() as usize
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Samplers
// ─────────────────────────────────────────────────────────────────────────────

/// Weighted sampling with replacement over edge positions.
pub trait EdgeSampler: Send {
    fn name(&self) -> &'static str;

    fn n_edges(&self) -> usize;

    /// Edge positions for one pass of `n_samples` draws.
    fn draws<'a>(
        &'a self,
        n_samples: usize,
        rng: &'a mut StdRng,
    ) -> Box<dyn Iterator<Item = usize> + 'a>;
}

/// Builds the whole index vector of a pass up front.
pub struct InMemorySampler {
    dist: WeightedIndex<f32>,
    n_edges: usize,
}

impl InMemorySampler {
    pub fn new(weights: &[f32]) -> Option<Self> {
        WeightedIndex::new(weights.iter().copied())
            .ok()
            .map(|dist| Self {
                dist,
                n_edges: weights.len(),
            })
    }
}

impl EdgeSampler for InMemorySampler {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn n_edges(&self) -> usize {
        self.n_edges
    }

    fn draws<'a>(
        &'a self,
        n_samples: usize,
        rng: &'a mut StdRng,
    ) -> Box<dyn Iterator<Item = usize> + 'a> {
        let picked: Vec<usize> = (0..n_samples).map(|_| self.dist.sample(rng)).collect();
        Box::new(picked.into_iter())
    }
}

/// Vose alias table; memory is O(edges) no matter how many draws a pass needs.
pub struct StreamingSampler {
    prob: Vec<f64>,
    alias: Vec<usize>,
}

impl StreamingSampler {
    pub fn new(weights: &[f32]) -> Option<Self> {
        let n = weights.len();
        let total: f64 = weights.iter().map(|&w| w.max(0.0) as f64).sum();
        if n == 0 || total <= 0.0 {
            return None;
        }

        let mut scaled: Vec<f64> = weights
            .iter()
            .map(|&w| w.max(0.0) as f64 * n as f64 / total)
            .collect();
        let mut prob = vec![1.0f64; n];
        let mut alias: Vec<usize> = (0..n).collect();

        let (mut small, mut large): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&i| scaled[i] < 1.0);

        while let (Some(s), Some(l)) = (small.pop(), large.pop()) {
            prob[s] = scaled[s];
            alias[s] = l;
            scaled[l] = scaled[l] + scaled[s] - 1.0;
            if scaled[l] < 1.0 {
                small.push(l);
            } else {
                large.push(l);
            }
        }
        // Leftovers are 1 up to rounding.
        for i in small.into_iter().chain(large) {
            prob[i] = 1.0;
        }

        Some(Self { prob, alias })
    }

    #[inline]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let column = rng.random_range(0..self.prob.len());
        if rng.random::<f64>() < self.prob[column] {
            column
        } else {
            self.alias[column]
        }
    }
}

impl EdgeSampler for StreamingSampler {
    fn name(&self) -> &'static str {
        "streaming-alias"
    }

    fn n_edges(&self) -> usize {
        self.prob.len()
    }

    fn draws<'a>(
        &'a self,
        n_samples: usize,
        rng: &'a mut StdRng,
    ) -> Box<dyn Iterator<Item = usize> + 'a> {
        Box::new((0..n_samples).map(move |_| self.sample(rng)))
    }
}

/// Pick the sampler for a probability vector. `None` when nothing can be drawn.
pub fn build_sampler(probs: &[f32], kind: SamplerKind) -> Option<Box<dyn EdgeSampler>> {
    let streaming = match kind {
        SamplerKind::Streaming => true,
        SamplerKind::InMemory => false,
        SamplerKind::Auto => {
            let over = probs.len() > STREAMING_THRESHOLD;
            if over {
                log::warn!(
                    "  ⚠ {} edges exceed the in-memory sampling limit, switching to streaming",
                    probs.len()
                );
            }
            over
        }
    };

    if streaming {
        StreamingSampler::new(probs).map(|s| Box::new(s) as Box<dyn EdgeSampler>)
    } else {
        InMemorySampler::new(probs).map(|s| Box::new(s) as Box<dyn EdgeSampler>)
    }
}
