//! Training strategies behind one interface.
//!
//! | kind      | model                    | edges / batches            | checkpoint |
//! |-----------|--------------------------|----------------------------|------------|
//! | `Dvi`     | chained, one per epoch   | spatial, temporal loss     | per epoch  |
//! | `TimeVis` | shared                   | stacked spatial + temporal | per run    |
//! | `DynaVis` | shared, time-conditioned | per-sample trajectories    | per run    |

pub mod dvi;
pub mod dynavis;
pub mod timevis;

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use trajvis_core::backend::{AutoDevice, get_device};
use trajvis_core::error::Result;
use trajvis_core::trainer::{TrainOutcome, TrainerState};

use crate::config::{StrategyKind, VisConfig};
use crate::store::SnapshotSource;

pub use dvi::Dvi;
pub use dynavis::DynaVis;
pub use timevis::TimeVis;

/// Summary of one trained checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub key: String,
    pub loss: f32,
    pub best_loss: f32,
    pub epochs_run: usize,
    pub converged: bool,
}

impl RunRecord {
    pub fn from_outcome<B: AutodiffBackend>(key: String, outcome: &TrainOutcome<B>) -> Self {
        Self {
            key,
            loss: outcome.loss,
            best_loss: outcome.best_loss,
            epochs_run: outcome.epochs_run(),
            converged: outcome.state == TrainerState::Converged,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub strategy: StrategyKind,
    /// Snapshot epochs covered by the run, ascending.
    pub epochs: Vec<usize>,
    pub runs: Vec<RunRecord>,
}

impl TrainReport {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            epochs: Vec::new(),
            runs: Vec::new(),
        }
    }

    pub fn final_loss(&self) -> Option<f32> {
        self.runs.last().map(|r| r.loss)
    }
}

pub trait VisStrategy {
    fn kind(&self) -> StrategyKind;

    /// Train on every available snapshot and persist the resulting
    /// checkpoint(s) under the run directory.
    fn train(&self, source: &dyn SnapshotSource, device: &AutoDevice) -> Result<TrainReport>;
}

pub fn strategy_for(config: &VisConfig) -> Box<dyn VisStrategy> {
    match config.strategy {
        StrategyKind::Dvi => Box::new(Dvi::new(config.clone())),
        StrategyKind::TimeVis => Box::new(TimeVis::new(config.clone())),
        StrategyKind::DynaVis => Box::new(DynaVis::new(config.clone())),
    }
}

/// Train the configured strategy to completion on the default device.
pub fn train_vis_model(config: &VisConfig, source: &dyn SnapshotSource) -> Result<TrainReport> {
    config.validate()?;
    let strategy = strategy_for(config);
    log::info!("🚀 training {} visualization '{}'", strategy.kind(), config.vis_id);
    strategy.train(source, &get_device())
}
