//! Loss assembly over sampled edges.
//!
//! total = UMAP(attraction + repulsion)
//!       + λ_rec · reconstruction
//!       + ramp(epoch) · λ_temporal · temporal
//!
//! The ramp is the linear warm-up of auxiliary terms; attraction and
//! reconstruction keep constant weights.

use std::sync::Arc;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::distance::paired_squared;
use crate::loader::EdgeBatch;
use crate::model::{FrozenModel, VisModel};
use crate::trainer::{Criterion, LossTerms};

/// Floor inside the cross-entropy logarithms.
pub const CE_EPS: f32 = 1e-4;
/// Added to squared distances before fractional powers.
pub const DIST_EPS: f32 = 1e-8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NprWeighting {
    /// One scalar: the mean neighbour-preserving rate of the epoch.
    #[default]
    Mean,
    /// Every point carries its own rate.
    PerPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub negative_sample_rate: usize,
    pub repulsion_strength: f32,
    pub min_dist: f32,
    pub spread: f32,
    pub lambda_rec: f32,
    pub lambda_temporal: f32,
    pub npr_weighting: NprWeighting,
    /// Drift below this 2-D distance is free.
    pub temporal_margin: f32,
    /// Epochs over which auxiliary weights ramp from 0 to 1; 0 disables.
    pub warmup_epochs: usize,
    pub seed: u64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            negative_sample_rate: 5,
            repulsion_strength: 1.0,
            min_dist: 0.1,
            spread: 1.0,
            lambda_rec: 1.0,
            lambda_temporal: 1.0,
            npr_weighting: NprWeighting::Mean,
            temporal_margin: 0.0,
            warmup_epochs: 0,
            seed: 7,
        }
    }
}

/// Linear ramp `min(1, epoch / epochs)` with 1-based epochs.
#[derive(Debug, Clone, Copy)]
pub struct Warmup {
    pub epochs: usize,
}

impl Warmup {
    pub fn scale(&self, epoch: usize) -> f32 {
        if self.epochs == 0 {
            1.0
        } else {
            ((epoch + 1) as f32 / self.epochs as f32).min(1.0)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Curve parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Fit `a`, `b` of `1 / (1 + a·x^{2b})` to the target membership curve
/// (1 below `min_dist`, `exp(−(x − min_dist)/spread)` above) with
/// Levenberg–Marquardt on 300 points in [0, 3·spread].
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {
    let spread = spread as f64;
    let min_dist = min_dist as f64;
    let xs: Vec<f64> = (0..300)
        .map(|i| 3.0 * spread * i as f64 / 299.0)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let cost = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    let (mut a, mut b) = (1.0f64, 1.0f64);
    let mut damping = 1e-3;
    let mut current = cost(a, b);

    for _ in 0..500 {
        // Normal equations JᵀJ δ = −Jᵀr
        let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let p = x.powf(2.0 * b);
            let denom = 1.0 + a * p;
            let f = 1.0 / denom;
            let r = f - y;
            let da = -p / (denom * denom);
            let db = -a * p * 2.0 * x.ln() / (denom * denom);
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }

        let (maa, mbb) = (jaa * (1.0 + damping), jbb * (1.0 + damping));
        let det = maa * mbb - jab * jab;
        if det.abs() < 1e-300 {
            break;
        }
        let step_a = -(mbb * ga - jab * gb) / det;
        let step_b = -(maa * gb - jab * ga) / det;

        let (na, nb) = (a + step_a, b + step_b);
        let next = if na > 0.0 && nb > 0.0 { cost(na, nb) } else { f64::INFINITY };
        if next < current {
            a = na;
            b = nb;
            let converged = (current - next).abs() < 1e-14;
            current = next;
            damping = (damping / 10.0).max(1e-12);
            if converged {
                break;
            }
        } else {
            damping *= 10.0;
            if damping > 1e12 {
                break;
            }
        }
    }

    (a as f32, b as f32)
}

// ─────────────────────────────────────────────────────────────────────────────
// UMAP cross-entropy
// ─────────────────────────────────────────────────────────────────────────────

/// Attraction on sampled edges, repulsion on shuffled negatives.
#[derive(Debug, Clone)]
pub struct UmapLoss {
    pub a: f32,
    pub b: f32,
    pub negative_sample_rate: usize,
    pub repulsion_strength: f32,
}

impl UmapLoss {
    pub fn new(config: &LossConfig) -> Self {
        let (a, b) = find_ab_params(config.spread, config.min_dist);
        log::debug!("UMAP curve: a={:.4}, b={:.4}", a, b);
        Self {
            a,
            b,
            negative_sample_rate: config.negative_sample_rate,
            repulsion_strength: config.repulsion_strength,
        }
    }

    /// q = 1 / (1 + a·d^{2b})
    pub fn probability<B: Backend>(&self, dist_sq: Tensor<B, 1>) -> Tensor<B, 1> {
        dist_sq
            .add_scalar(DIST_EPS)
            .powf_scalar(self.b)
            .mul_scalar(self.a)
            .add_scalar(1.0)
            .recip()
    }

    /// Mean cross-entropy over `batch` positives and `batch · k` negatives.
    ///
    /// Negatives pair every head with a shuffled tail from the repeated batch.
    pub fn forward<B: Backend>(
        &self,
        emb_to: Tensor<B, 2>,
        emb_from: Tensor<B, 2>,
        rng: &mut StdRng,
    ) -> Tensor<B, 1> {
        let [batch, dim] = emb_to.dims();
        let k = self.negative_sample_rate;
        let device = emb_to.device();

        let q_pos = self.probability(paired_squared(emb_to.clone(), emb_from.clone()));
        let attraction = q_pos.clamp(CE_EPS, 1.0).log().neg().sum();

        if k == 0 || batch == 0 {
            return attraction.div_scalar(batch.max(1) as f32);
        }

        let neg_to = emb_to
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, k)
            .reshape([batch * k, dim]);
        let repeated_from = emb_from
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, k)
            .reshape([batch * k, dim]);

        let mut perm: Vec<i64> = (0..(batch * k) as i64).collect();
        perm.shuffle(rng);
        let perm = Tensor::<B, 1, Int>::from_data(TensorData::new(perm, [batch * k]), &device);
        let neg_from = repeated_from.select(0, perm);

        let q_neg = self.probability(paired_squared(neg_to, neg_from));
        let repulsion = q_neg
            .neg()
            .add_scalar(1.0)
            .clamp(CE_EPS, 1.0)
            .log()
            .neg()
            .sum()
            .mul_scalar(self.repulsion_strength);

        (attraction + repulsion).div_scalar((batch * (k + 1)) as f32)
    }
}

/// Mean of the MSE at both edge endpoints.
pub fn reconstruction_loss<B: Backend>(
    to: Tensor<B, 2>,
    to_rec: Tensor<B, 2>,
    from: Tensor<B, 2>,
    from_rec: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let l_to = (to - to_rec).powf_scalar(2.0).mean();
    let l_from = (from - from_rec).powf_scalar(2.0).mean();
    (l_to + l_from).div_scalar(2.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Temporal consistency
// ─────────────────────────────────────────────────────────────────────────────

/// Drift of the live encoder from the frozen previous-epoch encoder.
pub enum TemporalTerm<B: AutodiffBackend> {
    /// First epoch of a chain: always exactly zero.
    Dummy,
    Consistency {
        prev: FrozenModel<B::InnerBackend>,
        /// Neighbour-preserving rate per point of this epoch.
        rates: Arc<Vec<f32>>,
        weighting: NprWeighting,
        margin: f32,
    },
}

impl<B: AutodiffBackend> TemporalTerm<B> {
    pub fn consistency(
        prev: FrozenModel<B::InnerBackend>,
        rates: Vec<f32>,
        weighting: NprWeighting,
        margin: f32,
    ) -> Self {
        TemporalTerm::Consistency {
            prev,
            rates: Arc::new(rates),
            weighting,
            margin,
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, TemporalTerm::Dummy)
    }

    /// `x`: high-D points, `y`: their live embedding, `idx`: sample indices.
    pub fn forward(
        &self,
        x: Tensor<B, 2>,
        y: Tensor<B, 2>,
        idx: &[usize],
    ) -> Tensor<B, 1> {
        let device = y.device();
        let TemporalTerm::Consistency {
            prev,
            rates,
            weighting,
            margin,
        } = self
        else {
            return Tensor::zeros([1], &device);
        };

        let y_prev = prev.encode(x.inner(), None);
        let y_prev = Tensor::<B, 2>::from_inner(y_prev);

        let mut drift = paired_squared(y, y_prev);
        if *margin > 0.0 {
            drift = burn::tensor::activation::relu(drift.add_scalar(DIST_EPS).sqrt().sub_scalar(*margin))
                .powf_scalar(2.0);
        }

        match weighting {
            NprWeighting::Mean => {
                let mean = if rates.is_empty() {
                    0.0
                } else {
                    rates.iter().sum::<f32>() / rates.len() as f32
                };
                drift.mean().mul_scalar(mean)
            }
            NprWeighting::PerPoint => {
                let w: Vec<f32> = idx
                    .iter()
                    .map(|&i| rates.get(i).copied().unwrap_or(0.0))
                    .collect();
                let w = Tensor::<B, 1>::from_data(TensorData::new(w, [idx.len()]), &device);
                (drift * w).mean()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Edge criterion
// ─────────────────────────────────────────────────────────────────────────────

pub struct EdgeCriterion<B: AutodiffBackend> {
    umap: UmapLoss,
    temporal: TemporalTerm<B>,
    lambda_rec: f32,
    lambda_temporal: f32,
    warmup: Warmup,
    ramp: f32,
    rng: StdRng,
}

impl<B: AutodiffBackend> EdgeCriterion<B> {
    pub fn new(config: &LossConfig, temporal: TemporalTerm<B>) -> Self {
        let warmup = Warmup {
            epochs: config.warmup_epochs,
        };
        Self {
            umap: UmapLoss::new(config),
            temporal,
            lambda_rec: config.lambda_rec,
            lambda_temporal: config.lambda_temporal,
            ramp: warmup.scale(0),
            warmup,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }
}

impl<B: AutodiffBackend> Criterion<B> for EdgeCriterion<B> {
    type Batch = EdgeBatch<B>;

    fn begin_epoch(&mut self, epoch: usize, _max_epochs: usize) {
        self.ramp = self.warmup.scale(epoch);
    }

    fn forward(&mut self, model: &VisModel<B>, batch: EdgeBatch<B>) -> LossTerms<B> {
        let EdgeBatch {
            to,
            from,
            to_idx,
            from_idx,
        } = batch;

        let y_to = model.encode(to.clone(), None);
        let y_from = model.encode(from.clone(), None);

        let umap = self.umap.forward(y_to.clone(), y_from.clone(), &mut self.rng);

        let to_rec = model.decode(y_to.clone(), None);
        let from_rec = model.decode(y_from.clone(), None);
        let recon = reconstruction_loss(to.clone(), to_rec, from.clone(), from_rec);

        let temporal = if self.temporal.is_dummy() {
            Tensor::zeros([1], &y_to.device())
        } else {
            let a = self.temporal.forward(to, y_to, &to_idx);
            let b = self.temporal.forward(from, y_from, &from_idx);
            (a + b).div_scalar(2.0)
        };

        let total = umap.clone()
            + recon.clone().mul_scalar(self.lambda_rec)
            + temporal
                .clone()
                .mul_scalar(self.lambda_temporal * self.ramp);

        LossTerms::new(total)
            .with("umap", umap)
            .with("recon", recon)
            .with("temporal", temporal)
    }
}
