//! Forward and inverse mappings of a trained run.
//!
//! Models are loaded from the checkpoint store on first use and cached.
//! Every call is chunked over rows to bound peak memory.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use burn::prelude::*;
use dashmap::DashMap;
use trajvis_core::backend::{AutoBackend, AutoDevice};
use trajvis_core::checkpoint::{CheckpointKey, CheckpointStore};
use trajvis_core::data::Matrix;
use trajvis_core::error::{Result, VisError};
use trajvis_core::model::{ModelConfig, VisModel};
use trajvis_core::normalization::NormStats;

use crate::config::{StrategyKind, VisConfig};
use crate::strategy::dynavis::NORM_STATS_FILE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectorMode {
    /// One checkpoint per epoch.
    PerEpoch,
    /// One checkpoint, epoch ignored.
    Shared,
    /// One checkpoint, epoch fed as normalised time; inputs pass through the
    /// saved normalisation statistics.
    TimeConditioned,
}

impl From<StrategyKind> for ProjectorMode {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Dvi => ProjectorMode::PerEpoch,
            StrategyKind::TimeVis => ProjectorMode::Shared,
            StrategyKind::DynaVis => ProjectorMode::TimeConditioned,
        }
    }
}

pub struct Projector {
    store: CheckpointStore,
    mode: ProjectorMode,
    batch_size: usize,
    device: AutoDevice,
    models: DashMap<CheckpointKey, (VisModel<AutoBackend>, ModelConfig)>,
    stats: OnceLock<Arc<NormStats>>,
}

impl Projector {
    pub fn new(store: CheckpointStore, mode: ProjectorMode, batch_size: usize, device: AutoDevice) -> Self {
        Self {
            store,
            mode,
            batch_size: batch_size.max(1),
            device,
            models: DashMap::new(),
            stats: OnceLock::new(),
        }
    }

    pub fn from_config(config: &VisConfig, device: AutoDevice) -> Self {
        Self::new(
            CheckpointStore::new(config.vis_dir()),
            config.strategy.into(),
            config.projection_batch,
            device,
        )
    }

    pub fn mode(&self) -> ProjectorMode {
        self.mode
    }

    fn key(&self, epoch: usize) -> CheckpointKey {
        match self.mode {
            ProjectorMode::PerEpoch => CheckpointKey::Epoch(epoch),
            ProjectorMode::Shared | ProjectorMode::TimeConditioned => CheckpointKey::Shared,
        }
    }

    /// Whether a trained model can serve `epoch`.
    pub fn has_model(&self, epoch: usize) -> bool {
        let key = self.key(epoch);
        if !self.store.exists(&key) {
            return false;
        }
        self.mode != ProjectorMode::TimeConditioned || self.stats_path().is_file()
    }

    fn stats_path(&self) -> PathBuf {
        self.store.root().join(NORM_STATS_FILE)
    }

    fn model(&self, epoch: usize) -> Result<(VisModel<AutoBackend>, ModelConfig)> {
        let key = self.key(epoch);
        if let Some(entry) = self.models.get(&key) {
            return Ok(entry.value().clone());
        }
        let (model, meta) = self.store.load::<AutoBackend>(&key, &self.device)?;
        log::debug!("loaded {} (loss={:.5}, {} epochs)", key, meta.loss, meta.epochs_run);
        self.models.insert(key, (model.clone(), meta.model.clone()));
        Ok((model, meta.model))
    }

    fn stats(&self) -> Result<Arc<NormStats>> {
        if let Some(stats) = self.stats.get() {
            return Ok(Arc::clone(stats));
        }
        let path = self.stats_path();
        if !path.is_file() {
            return Err(VisError::NotTrained {
                key: NORM_STATS_FILE.to_string(),
            });
        }
        let stats = Arc::new(NormStats::load(&path)?);
        Ok(Arc::clone(self.stats.get_or_init(|| stats)))
    }

    /// Runs `f` over row chunks of `x` and stacks the results.
    fn batched<F>(&self, x: &Matrix, out_cols: usize, f: F) -> Result<Matrix>
    where
        F: Fn(Tensor<AutoBackend, 2>) -> Tensor<AutoBackend, 2>,
    {
        if x.rows == 0 {
            return Ok(Matrix::zeros(0, out_cols));
        }
        let mut parts = Vec::with_capacity(x.rows.div_ceil(self.batch_size));
        for start in (0..x.rows).step_by(self.batch_size) {
            let end = (start + self.batch_size).min(x.rows);
            let chunk = x.slice_rows(start, end).to_tensor::<AutoBackend>(&self.device);
            parts.push(Matrix::from_tensor(f(chunk))?);
        }
        let refs: Vec<&Matrix> = parts.iter().collect();
        Matrix::vstack(&refs)
    }

    fn time(&self, rows: usize, t: Option<f32>) -> Option<Tensor<AutoBackend, 1>> {
        t.map(|t| Tensor::full([rows], t, &self.device))
    }

    /// High-D [N, D] → 2-D [N, 2] with the model of `epoch`.
    pub fn project(&self, epoch: usize, x: &Matrix) -> Result<Matrix> {
        let (model, layout) = self.model(epoch)?;
        let (x, t) = match self.mode {
            ProjectorMode::TimeConditioned => {
                let stats = self.stats()?;
                let raw = epoch as f32;
                (stats.normalize(x, stats.slot_of(raw))?, Some(stats.normalize_time(raw)))
            }
            _ => (x.clone(), None),
        };
        self.batched(&x, layout.latent_dim(), |chunk| {
            let [m, _] = chunk.dims();
            model.encode(chunk, self.time(m, t))
        })
    }

    /// 2-D [N, 2] → high-D [N, D] with the model of `epoch`.
    pub fn inverse(&self, epoch: usize, y: &Matrix) -> Result<Matrix> {
        let (model, layout) = self.model(epoch)?;
        let stats = match self.mode {
            ProjectorMode::TimeConditioned => Some(self.stats()?),
            _ => None,
        };
        let raw = epoch as f32;
        let t = stats.as_ref().map(|s| s.normalize_time(raw));
        let out = self.batched(y, layout.input_dim(), |chunk| {
            let [m, _] = chunk.dims();
            model.decode(chunk, self.time(m, t))
        })?;
        match stats {
            Some(stats) => stats.denormalize(&out, stats.slot_of(raw)),
            None => Ok(out),
        }
    }
}
