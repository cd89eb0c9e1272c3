//! Persisted visualization models.
//!
//! Layout under a run directory (`<content>/visualize/<vis_id>`):
//!
//! ```text
//! epochs/epoch_{e}/vis_model.mpk   chained per-epoch models
//! epochs/epoch_{e}/optimizer.mpk
//! epochs/epoch_{e}/checkpoint.json
//! vis_model.mpk                    shared (time-conditioned) model
//! optimizer.mpk
//! checkpoint.json
//! ```
//!
//! `checkpoint.json` carries the loss and the architecture needed to rebuild
//! the module before its weights are loaded.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisError};
use crate::model::{ModelConfig, VisModel};

const MODEL_FILE: &str = "vis_model";
const OPTIMIZER_FILE: &str = "optimizer";
const META_FILE: &str = "checkpoint.json";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CheckpointKey {
    /// One model per epoch of a chain.
    Epoch(usize),
    /// One model for the whole run.
    Shared,
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CheckpointKey::Epoch(e) => write!(f, "epoch_{}", e),
            CheckpointKey::Shared => write!(f, "shared"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub key: String,
    pub loss: f32,
    pub best_loss: f32,
    pub epochs_run: usize,
    pub converged: bool,
    pub model: ModelConfig,
}

/// Checkpoint directory of one visualization run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, key: &CheckpointKey) -> PathBuf {
        match key {
            CheckpointKey::Epoch(e) => self.root.join("epochs").join(format!("epoch_{}", e)),
            CheckpointKey::Shared => self.root.clone(),
        }
    }

    pub fn exists(&self, key: &CheckpointKey) -> bool {
        let dir = self.dir(key);
        dir.join(META_FILE).is_file() && dir.join(format!("{MODEL_FILE}.mpk")).is_file()
    }

    fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
        NamedMpkFileRecorder::<FullPrecisionSettings>::new()
    }

    /// Persist weights (inference copy), optimizer state and metadata.
    pub fn save<B, R>(
        &self,
        key: &CheckpointKey,
        model: &VisModel<B>,
        optimizer: R,
        meta: &CheckpointMeta,
    ) -> Result<()>
    where
        B: AutodiffBackend,
        R: Record<B>,
    {
        let dir = self.dir(key);
        std::fs::create_dir_all(&dir)?;

        let recorder = Self::recorder();
        model.valid().save_file(dir.join(MODEL_FILE), &recorder)?;
        Recorder::<B>::record(&recorder, optimizer, dir.join(OPTIMIZER_FILE))?;

        let file = std::fs::File::create(dir.join(META_FILE))?;
        serde_json::to_writer_pretty(file, meta)?;

        log::info!("💾 checkpoint {} saved to {}", key, dir.display());
        Ok(())
    }

    pub fn load_meta(&self, key: &CheckpointKey) -> Result<CheckpointMeta> {
        if !self.exists(key) {
            return Err(VisError::NotTrained {
                key: key.to_string(),
            });
        }
        let file = std::fs::File::open(self.dir(key).join(META_FILE))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// Rebuild the module from its metadata and load the weights.
    pub fn load<B: Backend>(
        &self,
        key: &CheckpointKey,
        device: &B::Device,
    ) -> Result<(VisModel<B>, CheckpointMeta)> {
        let meta = self.load_meta(key)?;
        let model = meta
            .model
            .init::<B>(device)?
            .load_file(self.dir(key).join(MODEL_FILE), &Self::recorder(), device)?;
        Ok((model, meta))
    }
}

/// Where a trainer writes its checkpoint on completion.
#[derive(Debug, Clone)]
pub struct CheckpointTarget {
    pub store: CheckpointStore,
    pub key: CheckpointKey,
    pub model: ModelConfig,
}
