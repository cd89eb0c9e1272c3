//! Normalisation statistics for the time-conditioned variant.
//!
//! Computed once over the stacked trajectories X[T, N, D] and persisted next
//! to the shared model, so projection at serving time applies exactly the
//! transform seen during training. Time is always mapped to [0, 1].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::Matrix;
use crate::error::{Result, VisError};

/// Which centre/scale to use per feature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsMode {
    /// Mean and std over every epoch and sample.
    Global,
    /// Mean and std of the first epoch only.
    Anchor0,
    /// Median and IQR / 1.349.
    #[default]
    Robust,
    /// Separate mean and std for every epoch.
    PerEpoch,
    /// Global mean, unit scale.
    CenterOnly,
}

impl std::fmt::Display for StatsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            StatsMode::Global => "global",
            StatsMode::Anchor0 => "anchor0",
            StatsMode::Robust => "robust",
            StatsMode::PerEpoch => "per_epoch",
            StatsMode::CenterOnly => "center_only",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormStats {
    pub mode: StatsMode,
    /// Raw time of every epoch slot, in stacking order.
    pub times: Vec<f32>,
    pub t_min: f32,
    pub t_max: f32,
    /// One row per epoch in `PerEpoch` mode, a single row otherwise.
    pub mean: Vec<Vec<f32>>,
    pub std: Vec<Vec<f32>>,
}

fn clip_std(v: f32, low: f32, high: f32) -> f32 {
    let v = v.max(low);
    if high > 0.0 { v.min(high) } else { v }
}

/// Linear-interpolated quantile of a sorted slice.
fn quantile(sorted: &[f32], q: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f32)
}

fn mean_std<'a>(rows: impl Iterator<Item = &'a [f32]>, dim: usize) -> (Vec<f32>, Vec<f32>) {
    let mut sum = vec![0.0f64; dim];
    let mut sq = vec![0.0f64; dim];
    let mut n = 0usize;
    for row in rows {
        for (j, &v) in row.iter().enumerate() {
            sum[j] += v as f64;
            sq[j] += (v as f64) * (v as f64);
        }
        n += 1;
    }
    let n = n.max(1) as f64;
    let mean: Vec<f32> = sum.iter().map(|s| (s / n) as f32).collect();
    let std = sum
        .iter()
        .zip(&sq)
        .map(|(s, q)| ((q / n - (s / n).powi(2)).max(0.0)).sqrt() as f32)
        .collect();
    (mean, std)
}

impl NormStats {
    /// Statistics over epochs `xs` (each [N, D]) observed at raw times `ts`.
    pub fn compute(
        xs: &[&Matrix],
        ts: &[f32],
        mode: StatsMode,
        std_clip_low: f32,
        std_clip_high: f32,
    ) -> Result<Self> {
        let dim = xs.first().map(|m| m.cols).ok_or_else(|| {
            VisError::EmptyTrainingSet("normalisation needs at least one epoch".into())
        })?;
        if xs.iter().any(|m| m.cols != dim) || xs.len() != ts.len() {
            return Err(VisError::Shape(
                "epochs disagree on width or time count".into(),
            ));
        }

        let t_min = ts.iter().copied().fold(f32::INFINITY, f32::min);
        let t_max = ts.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let clip = |v: Vec<f32>| -> Vec<f32> {
            v.into_iter()
                .map(|s| clip_std(s, std_clip_low, std_clip_high))
                .collect()
        };
        let all_rows = || xs.iter().flat_map(|m| m.data.chunks(dim));

        let (mean, std) = match mode {
            StatsMode::PerEpoch => {
                let (mut means, mut stds) = (Vec::new(), Vec::new());
                for m in xs {
                    let (mu, sd) = mean_std(m.data.chunks(dim), dim);
                    means.push(mu);
                    stds.push(clip(sd));
                }
                (means, stds)
            }
            StatsMode::Anchor0 => {
                let (mu, sd) = mean_std(xs[0].data.chunks(dim), dim);
                (vec![mu], vec![clip(sd)])
            }
            StatsMode::Robust => {
                let mut median = Vec::with_capacity(dim);
                let mut scale = Vec::with_capacity(dim);
                for j in 0..dim {
                    let mut col: Vec<f32> = all_rows().map(|r| r[j]).collect();
                    col.sort_unstable_by(|a, b| a.total_cmp(b));
                    median.push(quantile(&col, 0.5));
                    scale.push((quantile(&col, 0.75) - quantile(&col, 0.25)) / 1.349);
                }
                (vec![median], vec![clip(scale)])
            }
            StatsMode::CenterOnly => {
                let (mu, _) = mean_std(all_rows(), dim);
                (vec![mu], vec![vec![1.0; dim]])
            }
            StatsMode::Global => {
                let (mu, sd) = mean_std(all_rows(), dim);
                (vec![mu], vec![clip(sd)])
            }
        };

        Ok(Self {
            mode,
            times: ts.to_vec(),
            t_min,
            t_max,
            mean,
            std,
        })
    }

    /// Raw time → [0, 1].
    pub fn normalize_time(&self, t: f32) -> f32 {
        let den = if self.t_max > self.t_min {
            self.t_max - self.t_min
        } else {
            1.0
        };
        (t - self.t_min) / den
    }

    /// Slot of the epoch observed closest to raw time `t`.
    pub fn slot_of(&self, t: f32) -> usize {
        self.times
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - t).abs().total_cmp(&(b.1 - t).abs()))
            .map(|(slot, _)| slot)
            .unwrap_or(0)
    }

    fn row_for(&self, slot: usize) -> usize {
        if self.mode == StatsMode::PerEpoch {
            slot.min(self.mean.len().saturating_sub(1))
        } else {
            0
        }
    }

    /// (x − μ) / σ for the epoch in position `slot`.
    pub fn normalize(&self, x: &Matrix, slot: usize) -> Result<Matrix> {
        let r = self.row_for(slot);
        let (mu, sd) = (&self.mean[r], &self.std[r]);
        if x.cols != mu.len() {
            return Err(VisError::Shape(format!(
                "stats are {}-dimensional, input is {}",
                mu.len(),
                x.cols
            )));
        }
        let data = x
            .data
            .chunks(x.cols)
            .flat_map(|row| row.iter().zip(mu).zip(sd).map(|((v, m), s)| (v - m) / s))
            .collect();
        Matrix::new(data, x.rows, x.cols)
    }

    /// x · σ + μ, the inverse of [`normalize`](Self::normalize).
    pub fn denormalize(&self, x: &Matrix, slot: usize) -> Result<Matrix> {
        let r = self.row_for(slot);
        let (mu, sd) = (&self.mean[r], &self.std[r]);
        if x.cols != mu.len() {
            return Err(VisError::Shape(format!(
                "stats are {}-dimensional, input is {}",
                mu.len(),
                x.cols
            )));
        }
        let data = x
            .data
            .chunks(x.cols)
            .flat_map(|row| row.iter().zip(mu).zip(sd).map(|((v, m), s)| v * s + m))
            .collect();
        Matrix::new(data, x.rows, x.cols)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
