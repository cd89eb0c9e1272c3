//! Motion losses for the time-conditioned variant.
//!
//! All three compare a trajectory in high-D (`x` [B, T, D]) with its 2-D
//! image (`y` [B, T, 2]) through the per-step displacements
//! vₖ = seq[k+1] − seq[k], k ∈ 0..T−1:
//!
//! - **ranking_speed_loss**: the three fastest high-D steps keep their
//!   order and stay ahead of every other step in 2-D (margins on speeds
//!   normalised by the mean of the top three).
//! - **speed_distribution_kl**: KL between softmax(speed/τ) profiles, with
//!   τ annealed over the joint stage.
//! - **direction_consistency**: cosine between each step and the displacement
//!   over the next W steps must agree between spaces, for several W.

use burn::prelude::*;
use burn::tensor::activation;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::data::tensor_to_vec;
use crate::loader::SequenceBatch;
use crate::model::VisModel;
use crate::trainer::{Criterion, LossTerms};

const EPS: f32 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub lambda_rec: f32,
    pub lambda_dir: f32,
    pub lambda_rank: f32,
    pub kl_weight: f32,
    pub warmup_epochs: usize,
    pub tau_start: f32,
    pub tau_end: f32,
    pub margin_top_order: f32,
    pub margin_top_vs_rest: f32,
    pub windows: Vec<usize>,
    pub gamma: f32,
    pub min_step_norm: f32,
    pub weighted_by_p: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            lambda_rec: 1.0,
            lambda_dir: 1.5,
            lambda_rank: 0.8,
            kl_weight: 0.5,
            warmup_epochs: 16,
            tau_start: 0.7,
            tau_end: 0.25,
            margin_top_order: 0.02,
            margin_top_vs_rest: 0.01,
            windows: vec![2, 4, 8],
            gamma: 3.5,
            min_step_norm: 1e-4,
            weighted_by_p: true,
        }
    }
}

impl MotionConfig {
    /// Linear τ schedule from `tau_start` (first epoch) to `tau_end` (last).
    pub fn tau(&self, epoch: usize, max_epochs: usize) -> f32 {
        let span = max_epochs.saturating_sub(1).max(1) as f32;
        self.tau_start + (self.tau_end - self.tau_start) * (epoch.min(max_epochs) as f32 / span).min(1.0)
    }
}

/// Step displacements [B, T−1, D].
fn steps<B: Backend>(seq: Tensor<B, 3>) -> Tensor<B, 3> {
    let [b, t, d] = seq.dims();
    seq.clone().slice([0..b, 1..t, 0..d]) - seq.slice([0..b, 0..t - 1, 0..d])
}

/// Step speeds [B, T−1].
pub fn speeds<B: Backend>(seq: Tensor<B, 3>) -> Tensor<B, 2> {
    steps(seq)
        .powf_scalar(2.0)
        .sum_dim(2)
        .squeeze_dim::<2>(2)
        .add_scalar(EPS)
        .sqrt()
}

fn int_index<B: Backend>(idx: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let v: Vec<i64> = idx.iter().map(|&i| i as i64).collect();
    Tensor::<B, 1, Int>::from_data(TensorData::new(v, [idx.len()]), device)
}

/// Top-3 speed ordering preserved from high-D to 2-D.
pub fn ranking_speed_loss<B: Backend>(
    x: Tensor<B, 3>,
    y: Tensor<B, 3>,
    margin_top_order: f32,
    margin_top_vs_rest: f32,
) -> Tensor<B, 1> {
    let device = y.device();
    let s_hi = speeds(x);
    let s_lo = speeds(y);
    let [b, k] = s_lo.dims();
    if k < 3 || b == 0 {
        return Tensor::zeros([1], &device);
    }
    // The target ordering carries no gradient.
    let hi = match tensor_to_vec(s_hi) {
        Ok(v) => v,
        Err(_) => return Tensor::zeros([1], &device),
    };

    let mut losses = Vec::with_capacity(b);
    for row in 0..b {
        let sh = &hi[row * k..(row + 1) * k];
        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&i, &j| sh[j].total_cmp(&sh[i]));
        let (top, rest) = order.split_at(3);

        let sl = s_lo.clone().slice([row..row + 1, 0..k]).reshape([k]);
        let top_lo = sl.clone().select(0, int_index::<B>(top, &device));
        let scale = top_lo.clone().mean().add_scalar(EPS);
        let top_n = top_lo / scale.clone();

        let s1 = top_n.clone().slice([0..1]);
        let s2 = top_n.clone().slice([1..2]);
        let s3 = top_n.clone().slice([2..3]);
        let l1 = activation::relu((s2.clone() - s1).add_scalar(margin_top_order));
        let l2 = activation::relu((s3 - s2).add_scalar(margin_top_order));

        let mut total = l1 + l2;
        if !rest.is_empty() {
            let sln_rest = sl.select(0, int_index::<B>(rest, &device)) / scale;
            let min_top = top_n.min();
            let l3 = activation::relu((sln_rest - min_top).add_scalar(margin_top_vs_rest)).mean();
            total = total + l3;
        }
        losses.push(total);
    }
    Tensor::cat(losses, 0).mean()
}

/// KL(softmax(ŝ_hi/τ) ‖ softmax(ŝ_lo/τ)) over mean-normalised speeds.
pub fn speed_distribution_kl<B: Backend>(
    x: Tensor<B, 3>,
    y: Tensor<B, 3>,
    tau: f32,
    weighted_by_p: bool,
    min_step_norm: f32,
) -> Tensor<B, 1> {
    let device = y.device();
    let s_hi = speeds(x);
    let s_lo = speeds(y);
    let [b, k] = s_lo.dims();
    if b == 0 || k == 0 {
        return Tensor::zeros([1], &device);
    }

    let keep: Vec<usize> = {
        let mean_hi = tensor_to_vec(s_hi.clone().mean_dim(1)).unwrap_or_default();
        let mean_lo = tensor_to_vec(s_lo.clone().mean_dim(1)).unwrap_or_default();
        mean_hi
            .iter()
            .zip(&mean_lo)
            .enumerate()
            .filter(|(_, (h, l))| **h > min_step_norm && **l > min_step_norm)
            .map(|(i, _)| i)
            .collect()
    };
    if keep.is_empty() {
        return Tensor::zeros([1], &device);
    }
    let rows = int_index::<B>(&keep, &device);
    let s_hi = s_hi.select(0, rows.clone());
    let s_lo = s_lo.select(0, rows);

    let s_hi = s_hi.clone() / s_hi.mean_dim(1).add_scalar(EPS);
    let s_lo = s_lo.clone() / s_lo.mean_dim(1).add_scalar(EPS);

    let p = activation::softmax(s_hi.div_scalar(tau), 1).detach();
    let q = activation::softmax(s_lo.div_scalar(tau), 1);

    let log_ratio = p.clone().clamp_min(EPS).log() - q.clamp_min(EPS).log();
    let per_row = if weighted_by_p {
        (p.clone() * p * log_ratio).sum_dim(1)
    } else {
        (p * log_ratio).sum_dim(1)
    };
    per_row.mean()
}

/// Displacement over the next `w` steps (clamped at the end) for every step.
fn window_reference<B: Backend>(seq: Tensor<B, 3>, w: usize) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let [b, t, d] = seq.dims();
    let k = t - 1;
    let v = steps(seq.clone());
    if w <= 1 {
        return (v.clone(), v);
    }
    let right: Vec<usize> = (0..k).map(|i| (i + w).min(k)).collect();
    let right = seq
        .clone()
        .select(1, int_index::<B>(&right, &seq.device()));
    let left = seq.slice([0..b, 0..k, 0..d]);
    (v, right - left)
}

fn unit_rows<B: Backend>(v: Tensor<B, 3>, eps: f32) -> Tensor<B, 3> {
    let norm = v.clone().powf_scalar(2.0).sum_dim(2).sqrt().clamp_min(eps);
    v / norm
}

/// Multi-scale direction consistency, averaged over usable windows.
pub fn direction_consistency<B: Backend>(
    x: Tensor<B, 3>,
    y: Tensor<B, 3>,
    windows: &[usize],
    min_step_norm: f32,
    gamma: f32,
    eps: f32,
) -> Tensor<B, 1> {
    let device = y.device();
    let [b, t, _] = y.dims();
    if t < 2 || b == 0 {
        return Tensor::zeros([1], &device);
    }
    let k = t - 1;

    let mut total: Option<Tensor<B, 1>> = None;
    let mut used = 0usize;
    for &w in windows {
        let (v_hi, ref_hi) = window_reference(x.clone(), w);
        let (v_lo, ref_lo) = window_reference(y.clone(), w);

        let norm_of = |r: &Tensor<B, 3>| {
            tensor_to_vec(r.clone().powf_scalar(2.0).sum_dim(2).sqrt()).unwrap_or_default()
        };
        let (n_hi, n_lo) = (norm_of(&ref_hi), norm_of(&ref_lo));
        let mask: Vec<usize> = (0..b * k)
            .filter(|&i| {
                n_hi.get(i).is_some_and(|&n| n > min_step_norm)
                    && n_lo.get(i).is_some_and(|&n| n > min_step_norm)
            })
            .collect();
        if mask.is_empty() {
            continue;
        }
        let mask = int_index::<B>(&mask, &device);

        let cos_hi = (unit_rows(v_hi, eps) * unit_rows(ref_hi, eps))
            .sum_dim(2)
            .reshape([b * k])
            .select(0, mask.clone());
        let cos_lo = (unit_rows(v_lo, eps) * unit_rows(ref_lo, eps))
            .sum_dim(2)
            .reshape([b * k])
            .select(0, mask);

        let l_sq = (cos_hi.clone() - cos_lo.clone()).powf_scalar(2.0).mean();
        let prod = (cos_hi * cos_lo.clone()).clamp(-1.0 + eps, 1.0 - eps);
        let l_pow = prod.neg().add_scalar(1.0).powf_scalar(3.0).mean();
        let amp = cos_lo
            .neg()
            .add_scalar(1.0)
            .abs()
            .mul_scalar(gamma)
            .add_scalar(1.0)
            .mean();

        let l_w = l_sq.mul_scalar(0.7) + (l_pow * amp).mul_scalar(0.3);
        total = Some(match total {
            Some(acc) => acc + l_w,
            None => l_w,
        });
        used += 1;
    }

    match total {
        Some(sum) => sum.div_scalar(used as f32),
        None => Tensor::zeros([1], &device),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Criteria over trajectories
// ─────────────────────────────────────────────────────────────────────────────

/// Encode/decode a whole batch of trajectories at their own times.
fn roundtrip<B: Backend>(
    model: &VisModel<B>,
    batch: &SequenceBatch<B>,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let [b, t, d] = batch.x.dims();
    let flat_x = batch.x.clone().reshape([b * t, d]);
    let flat_t = batch.t.clone().reshape([b * t]);
    let y = model.encode(flat_x, Some(flat_t.clone()));
    let x_rec = model.decode(y.clone(), Some(flat_t));
    let latent = y.dims()[1];
    (y.reshape([b, t, latent]), x_rec.reshape([b, t, d]))
}

/// Autoencoder stage: reconstruction only.
pub struct ReconstructionCriterion;

impl<B: AutodiffBackend> Criterion<B> for ReconstructionCriterion {
    type Batch = SequenceBatch<B>;

    fn forward(&mut self, model: &VisModel<B>, batch: SequenceBatch<B>) -> LossTerms<B> {
        let (_, x_rec) = roundtrip(model, &batch);
        let rec = (batch.x - x_rec).powf_scalar(2.0).mean();
        LossTerms::new(rec.clone()).with("recon", rec)
    }
}

/// Joint stage: reconstruction plus warmed-up motion terms.
pub struct MotionCriterion {
    config: MotionConfig,
    ramp: f32,
    tau: f32,
}

impl MotionCriterion {
    pub fn new(config: MotionConfig) -> Self {
        let tau = config.tau_start;
        Self {
            config,
            ramp: 0.0,
            tau,
        }
    }

    pub fn tau(&self) -> f32 {
        self.tau
    }
}

impl<B: AutodiffBackend> Criterion<B> for MotionCriterion {
    type Batch = SequenceBatch<B>;

    fn begin_epoch(&mut self, epoch: usize, max_epochs: usize) {
        let warm = self.config.warmup_epochs.max(1) as f32;
        self.ramp = ((epoch + 1) as f32 / warm).min(1.0);
        self.tau = self.config.tau(epoch, max_epochs);
    }

    fn forward(&mut self, model: &VisModel<B>, batch: SequenceBatch<B>) -> LossTerms<B> {
        let c = &self.config;
        let (y, x_rec) = roundtrip(model, &batch);
        let x = batch.x;

        let rec = (x.clone() - x_rec).powf_scalar(2.0).mean();
        let dir = direction_consistency(
            x.clone(),
            y.clone(),
            &c.windows,
            c.min_step_norm,
            c.gamma,
            1e-6,
        );
        let rank = ranking_speed_loss(x.clone(), y.clone(), c.margin_top_order, c.margin_top_vs_rest);
        let kl = speed_distribution_kl(x, y, self.tau, c.weighted_by_p, EPS);

        let aux = dir.clone().mul_scalar(c.lambda_dir)
            + rank.clone().mul_scalar(c.lambda_rank)
            + kl.clone().mul_scalar(c.kl_weight);
        let total = rec.clone().mul_scalar(c.lambda_rec) + aux.mul_scalar(self.ramp);

        LossTerms::new(total)
            .with("recon", rec)
            .with("direction", dir)
            .with("rank", rank)
            .with("speed_kl", kl)
    }
}
