//! One time-conditioned model trained on per-sample trajectories.
//!
//! Stage 1 fits a plain autoencoder; stage 2 adds the motion terms under a
//! warm-up ramp and a cosine learning rate. Normalisation statistics are
//! written next to the model so the projector can replay them.

use std::sync::Arc;

use trajvis_core::backend::{AutoDevice, TrainBackend};
use trajvis_core::checkpoint::{CheckpointKey, CheckpointStore, CheckpointTarget};
use trajvis_core::data::Matrix;
use trajvis_core::error::{Result, VisError};
use trajvis_core::loader::SequenceLoader;
use trajvis_core::motion::{MotionCriterion, ReconstructionCriterion};
use trajvis_core::normalization::NormStats;
use trajvis_core::trainer::{LrSchedule, TrainConfig, Trainer};

use super::{RunRecord, TrainReport, VisStrategy};
use crate::config::{DynaVisConfig, StrategyKind, VisConfig};
use crate::store::SnapshotSource;

pub const NORM_STATS_FILE: &str = "norm_stats.json";

pub struct DynaVis {
    config: VisConfig,
}

impl DynaVis {
    pub fn new(config: VisConfig) -> Self {
        Self { config }
    }

    fn stage_config(dv: &DynaVisConfig, lr: f64, epochs: usize, schedule: LrSchedule) -> TrainConfig {
        TrainConfig {
            weight_decay: dv.weight_decay,
            grad_clip: Some(dv.grad_clip),
            ..TrainConfig::fixed(lr, epochs, schedule)
        }
    }
}

/// Interleave epochs [T][N, D] into trajectories [N, T, D].
fn trajectories(epochs: &[Matrix]) -> Vec<f32> {
    let (n, d) = epochs.first().map(|m| (m.rows, m.cols)).unwrap_or((0, 0));
    let mut out = Vec::with_capacity(n * epochs.len() * d);
    for i in 0..n {
        for m in epochs {
            out.extend_from_slice(m.row(i));
        }
    }
    out
}

impl VisStrategy for DynaVis {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DynaVis
    }

    fn train(&self, source: &dyn SnapshotSource, device: &AutoDevice) -> Result<TrainReport> {
        let dv = &self.config.dynavis;
        let snapshots = source.load_all()?;
        if snapshots.len() < 2 {
            return Err(VisError::EmptyTrainingSet(format!(
                "trajectories need at least 2 epochs, found {}",
                snapshots.len()
            )));
        }
        let n = snapshots[0].n_samples();
        let dim = snapshots[0].dim();
        if let Some(bad) = snapshots.iter().find(|s| s.n_samples() != n || s.dim() != dim) {
            return Err(VisError::Shape(format!(
                "epoch {} is [{}×{}], expected [{}×{}]",
                bad.epoch,
                bad.n_samples(),
                bad.dim(),
                n,
                dim
            )));
        }

        let xs: Vec<&Matrix> = snapshots.iter().map(|s| s.representation.as_ref()).collect();
        let raw_times: Vec<f32> = snapshots.iter().map(|s| s.epoch as f32).collect();
        let stats = NormStats::compute(&xs, &raw_times, dv.stats_mode, dv.std_clip_low, dv.std_clip_high)?;
        let normed = xs
            .iter()
            .enumerate()
            .map(|(slot, x)| stats.normalize(x, slot))
            .collect::<Result<Vec<_>>>()?;
        let times: Vec<f32> = raw_times.iter().map(|&t| stats.normalize_time(t)).collect();
        log::info!(
            "  • {} trajectories × {} steps × {}, stats={}",
            n,
            snapshots.len(),
            dim,
            stats.mode
        );

        let data = Arc::new(trajectories(&normed));
        let shape = [n, snapshots.len(), dim];
        let model_config = self.config.model_for(dim)?;
        let mut model = model_config.init::<TrainBackend>(device)?;

        if dv.epochs_ae > 0 {
            log::info!("  • stage 1: autoencoder, {} epochs", dv.epochs_ae);
            let mut loader = SequenceLoader::new(Arc::clone(&data), times.clone(), shape, dv.batch_size, dv.seed)?;
            let cfg = Self::stage_config(dv, dv.lr_ae, dv.epochs_ae, LrSchedule::Constant);
            model = Trainer::new(cfg)
                .fit(model, &mut ReconstructionCriterion, &mut loader, device, None)?
                .model;
        }

        log::info!("  • stage 2: joint motion, {} epochs", dv.epochs_joint);
        let mut loader = SequenceLoader::new(data, times, shape, dv.batch_size, dv.seed.wrapping_add(1))?;
        let schedule = LrSchedule::Cosine {
            t_max: dv.epochs_joint,
            eta_min: dv.lr_joint * 0.1,
        };
        let cfg = Self::stage_config(dv, dv.lr_joint, dv.epochs_joint, schedule);
        let store = CheckpointStore::new(self.config.vis_dir());
        let target = CheckpointTarget {
            store: store.clone(),
            key: CheckpointKey::Shared,
            model: model_config,
        };
        let mut criterion = MotionCriterion::new(dv.motion.clone());
        let outcome = Trainer::new(cfg).fit(model, &mut criterion, &mut loader, device, Some(&target))?;

        stats.save(&store.root().join(NORM_STATS_FILE))?;
        log::info!("💾 normalisation stats saved ({})", stats.mode);

        let mut report = TrainReport::new(StrategyKind::DynaVis);
        report.epochs = snapshots.iter().map(|s| s.epoch).collect();
        report
            .runs
            .push(RunRecord::from_outcome(CheckpointKey::Shared.to_string(), &outcome));
        Ok(report)
    }
}
