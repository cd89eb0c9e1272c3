//! Optimisation loop with patience-based early stopping.
//!
//! ```text
//! Idle → Training → per epoch { batches: forward → backward → Adam step }
//!                   → LR schedule step → convergence check
//!      → Converged (patience exhausted) | Done (max epochs)
//! ```
//!
//! Convergence: when an epoch improves on the previous one by less than
//! `tolerance`, patience is decremented and stopping happens at zero; any
//! sufficient improvement restores the full patience.

use burn::grad_clipping::GradientClippingConfig;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointMeta, CheckpointTarget};
use crate::error::{Result, VisError};
use crate::model::VisModel;

/// Loss value before the first epoch; any real first epoch improves on it.
const INITIAL_LOSS: f32 = 100.0;

// ─────────────────────────────────────────────────────────────────────────────
// Seams
// ─────────────────────────────────────────────────────────────────────────────

/// Yields one pass of training batches.
pub trait BatchSource<B: Backend> {
    type Batch;

    fn epoch_batches<'a>(
        &'a mut self,
        device: &'a B::Device,
    ) -> Box<dyn Iterator<Item = Self::Batch> + 'a>;
}

/// Scalar loss for a batch plus named components for logging.
pub trait Criterion<B: AutodiffBackend> {
    type Batch;

    fn begin_epoch(&mut self, _epoch: usize, _max_epochs: usize) {}

    fn forward(&mut self, model: &VisModel<B>, batch: Self::Batch) -> LossTerms<B>;
}

pub struct LossTerms<B: Backend> {
    pub total: Tensor<B, 1>,
    pub parts: Vec<(&'static str, f32)>,
}

impl<B: Backend> LossTerms<B> {
    pub fn new(total: Tensor<B, 1>) -> Self {
        Self {
            total,
            parts: Vec::new(),
        }
    }

    pub fn with(mut self, name: &'static str, value: Tensor<B, 1>) -> Self {
        self.parts.push((name, value.into_scalar().elem::<f32>()));
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LrSchedule {
    Constant,
    /// lr · γ^{⌊epoch / step_size⌋}
    Step { step_size: usize, gamma: f64 },
    /// Cosine from lr down to `eta_min` over `t_max` epochs.
    Cosine { t_max: usize, eta_min: f64 },
}

impl Default for LrSchedule {
    fn default() -> Self {
        LrSchedule::Step {
            step_size: 4,
            gamma: 0.1,
        }
    }
}

impl LrSchedule {
    pub fn lr(&self, base: f64, epoch: usize) -> f64 {
        match *self {
            LrSchedule::Constant => base,
            LrSchedule::Step { step_size, gamma } => {
                base * gamma.powi((epoch / step_size.max(1)) as i32)
            }
            LrSchedule::Cosine { t_max, eta_min } => {
                let t = epoch.min(t_max) as f64 / t_max.max(1) as f64;
                eta_min + (base - eta_min) * (1.0 + (std::f64::consts::PI * t).cos()) / 2.0
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub lr: f64,
    pub weight_decay: f32,
    pub schedule: LrSchedule,
    /// Gradient-norm clip; `None` disables.
    pub grad_clip: Option<f32>,
    pub patience: usize,
    pub tolerance: f32,
    pub max_epochs: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            weight_decay: 1e-5,
            schedule: LrSchedule::default(),
            grad_clip: None,
            patience: 3,
            tolerance: 1e-2,
            max_epochs: 20,
        }
    }
}

impl TrainConfig {
    /// Fixed-length run: patience never runs out before `max_epochs`.
    pub fn fixed(lr: f64, epochs: usize, schedule: LrSchedule) -> Self {
        Self {
            lr,
            schedule,
            patience: epochs.max(1),
            tolerance: f32::NEG_INFINITY,
            max_epochs: epochs,
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Training,
    Converged,
    Done,
}

#[derive(Debug, Clone)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f32,
    pub lr: f64,
    /// Per-component means over the epoch's batches.
    pub parts: Vec<(&'static str, f32)>,
}

impl EpochRecord {
    pub fn part(&self, name: &str) -> Option<f32> {
        self.parts.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}

pub struct TrainOutcome<B: AutodiffBackend> {
    pub model: VisModel<B>,
    pub state: TrainerState,
    pub loss: f32,
    pub best_loss: f32,
    pub history: Vec<EpochRecord>,
}

impl<B: AutodiffBackend> TrainOutcome<B> {
    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }

    /// Per-epoch series of one loss component.
    pub fn series(&self, name: &str) -> Vec<f32> {
        self.history.iter().filter_map(|r| r.part(name)).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trainer
// ─────────────────────────────────────────────────────────────────────────────

pub struct Trainer {
    pub config: TrainConfig,
    state: TrainerState,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Self {
        Self {
            config,
            state: TrainerState::Idle,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TrainConfig::default())
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Train until convergence or the epoch ceiling, then checkpoint.
    pub fn fit<B, C, S>(
        &mut self,
        model: VisModel<B>,
        criterion: &mut C,
        source: &mut S,
        device: &B::Device,
        checkpoint: Option<&CheckpointTarget>,
    ) -> Result<TrainOutcome<B>>
    where
        B: AutodiffBackend,
        C: Criterion<B, Batch = S::Batch>,
        S: BatchSource<B>,
    {
        let cfg = self.config.clone();

        log::info!("╔═══════════════════════════════════════════════════════╗");
        log::info!("║  TRAINING                                             ║");
        log::info!("╚═══════════════════════════════════════════════════════╝");
        log::info!(
            "  • lr={:.2e}, wd={:.1e}, schedule={:?}, patience={}, max_epochs={}",
            cfg.lr,
            cfg.weight_decay,
            cfg.schedule,
            cfg.patience,
            cfg.max_epochs
        );

        let mut adam = AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(cfg.weight_decay)));
        if let Some(clip) = cfg.grad_clip {
            adam = adam.with_grad_clipping(Some(GradientClippingConfig::Norm(clip)));
        }
        let mut optim = adam.init::<B, VisModel<B>>();

        self.state = TrainerState::Training;
        let mut model = model;
        let mut prev_loss = INITIAL_LOSS;
        let mut best_loss = f32::INFINITY;
        let mut patience_left = cfg.patience;
        let mut history = Vec::with_capacity(cfg.max_epochs);

        for epoch in 0..cfg.max_epochs {
            let lr = cfg.schedule.lr(cfg.lr, epoch);
            criterion.begin_epoch(epoch, cfg.max_epochs);

            let mut total = 0.0f64;
            let mut n_batches = 0usize;
            let mut parts: Vec<(&'static str, f64)> = Vec::new();

            for batch in source.epoch_batches(device) {
                let terms = criterion.forward(&model, batch);
                let value = terms.total.clone().into_scalar().elem::<f32>();
                let grads = GradientsParams::from_grads(terms.total.backward(), &model);
                model = optim.step(lr, model, grads);

                total += value as f64;
                n_batches += 1;
                for (name, v) in terms.parts {
                    match parts.iter_mut().find(|(n, _)| *n == name) {
                        Some(slot) => slot.1 += v as f64,
                        None => parts.push((name, v as f64)),
                    }
                }
                log::trace!("    batch {} loss={:.5}", n_batches, value);
            }

            if n_batches == 0 {
                self.state = TrainerState::Idle;
                return Err(VisError::EmptyTrainingSet(
                    "batch source produced no batches".into(),
                ));
            }

            let loss = (total / n_batches as f64) as f32;
            let record = EpochRecord {
                epoch,
                loss,
                lr,
                parts: parts
                    .into_iter()
                    .map(|(n, v)| (n, (v / n_batches as f64) as f32))
                    .collect(),
            };
            log::debug!(
                "  epoch {:>3}: loss={:.5} lr={:.2e} {:?}",
                epoch + 1,
                loss,
                lr,
                record.parts
            );
            history.push(record);
            best_loss = best_loss.min(loss);

            if prev_loss - loss < cfg.tolerance {
                patience_left = patience_left.saturating_sub(1);
                if patience_left == 0 {
                    self.state = TrainerState::Converged;
                    log::info!("  ✓ converged after {} epochs (loss={:.5})", epoch + 1, loss);
                    break;
                }
            } else {
                patience_left = cfg.patience;
            }
            prev_loss = loss;
        }

        if self.state == TrainerState::Training {
            self.state = TrainerState::Done;
            log::info!("  ✓ reached max epochs ({}), loss={:.5}", cfg.max_epochs, prev_loss);
        }

        let loss = history.last().map(|r| r.loss).unwrap_or(INITIAL_LOSS);
        if let Some(target) = checkpoint {
            let meta = CheckpointMeta {
                key: target.key.to_string(),
                loss,
                best_loss,
                epochs_run: history.len(),
                converged: self.state == TrainerState::Converged,
                model: target.model.clone(),
            };
            target
                .store
                .save(&target.key, &model, optim.to_record(), &meta)?;
        }

        Ok(TrainOutcome {
            model,
            state: self.state,
            loss,
            best_loss,
            history,
        })
    }
}
