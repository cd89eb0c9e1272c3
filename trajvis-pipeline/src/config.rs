//! Run configuration, loaded from a JSON file.
//!
//! Every section falls back to its defaults, so a minimal file only names
//! the content directory, the strategy and the subject model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use trajvis_core::error::{Result, VisError};
use trajvis_core::fuzzy::GraphConfig;
use trajvis_core::loss::LossConfig;
use trajvis_core::model::ModelConfig;
use trajvis_core::motion::MotionConfig;
use trajvis_core::normalization::StatsMode;
use trajvis_core::sampler::SamplerConfig;
use trajvis_core::temporal::TemporalConfig;
use trajvis_core::trainer::TrainConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// One chained model per epoch, temporal loss against the previous one.
    #[default]
    Dvi,
    /// One model over all epochs with spatial and temporal edges.
    TimeVis,
    /// One time-conditioned model trained on trajectories.
    DynaVis,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StrategyKind::Dvi => write!(f, "DVI"),
            StrategyKind::TimeVis => write!(f, "TimeVis"),
            StrategyKind::DynaVis => write!(f, "DynaVis"),
        }
    }
}

/// Two-stage schedule of the time-conditioned variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynaVisConfig {
    pub epochs_ae: usize,
    pub epochs_joint: usize,
    pub batch_size: usize,
    pub lr_ae: f64,
    /// Cosine-annealed down to a tenth of this value.
    pub lr_joint: f64,
    pub weight_decay: f32,
    pub grad_clip: f32,
    pub hidden: usize,
    pub depth: usize,
    pub time_dim: usize,
    pub stats_mode: StatsMode,
    pub std_clip_low: f32,
    /// 0 disables the upper clip.
    pub std_clip_high: f32,
    pub seed: u64,
    pub motion: MotionConfig,
}

impl Default for DynaVisConfig {
    fn default() -> Self {
        Self {
            epochs_ae: 20,
            epochs_joint: 40,
            batch_size: 256,
            lr_ae: 1e-3,
            lr_joint: 1.5e-4,
            weight_decay: 1e-5,
            grad_clip: 0.5,
            hidden: 256,
            depth: 3,
            time_dim: 32,
            stats_mode: StatsMode::Robust,
            std_clip_low: 1e-8,
            std_clip_high: 0.0,
            seed: 42,
            motion: MotionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisConfig {
    pub content_path: PathBuf,
    pub vis_id: String,
    pub strategy: StrategyKind,
    /// Registry name of the subject classifier.
    pub subject_model: String,
    pub classes: Vec<String>,
    /// Background image side length in pixels.
    pub resolution: usize,
    /// Rows per encode/decode/predict call.
    pub projection_batch: usize,
    /// Neighbourhood size of the quality report; 0 skips it.
    pub quality_k: usize,
    /// Explicit network layout; derived from the representation width if absent.
    pub model: Option<ModelConfig>,
    pub graph: GraphConfig,
    pub temporal: TemporalConfig,
    pub sampler: SamplerConfig,
    pub loss: LossConfig,
    pub train: TrainConfig,
    pub dynavis: DynaVisConfig,
}

impl Default for VisConfig {
    fn default() -> Self {
        Self {
            content_path: PathBuf::from("."),
            vis_id: "vis".to_string(),
            strategy: StrategyKind::Dvi,
            subject_model: "linear_softmax".to_string(),
            classes: Vec::new(),
            resolution: 300,
            projection_batch: 1000,
            quality_k: 15,
            model: None,
            graph: GraphConfig::default(),
            temporal: TemporalConfig::default(),
            sampler: SamplerConfig::default(),
            loss: LossConfig::default(),
            train: TrainConfig::default(),
            dynavis: DynaVisConfig::default(),
        }
    }
}

impl VisConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: VisConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vis_id.is_empty() {
            return Err(VisError::Config("vis_id must not be empty".into()));
        }
        if self.resolution == 0 || self.projection_batch == 0 {
            return Err(VisError::Config(
                "resolution and projection_batch must be positive".into(),
            ));
        }
        if self.graph.n_neighbors < 2 {
            return Err(VisError::Config("n_neighbors must be at least 2".into()));
        }
        if self.strategy == StrategyKind::DynaVis && self.dynavis.epochs_joint == 0 {
            return Err(VisError::Config("dynavis.epochs_joint must be positive".into()));
        }
        if let Some(model) = &self.model {
            model.validate()?;
            if self.strategy == StrategyKind::DynaVis && model.time_dim == 0 {
                return Err(VisError::Config(
                    "DynaVis needs a time-conditioned model (time_dim > 0)".into(),
                ));
            }
            if self.strategy != StrategyKind::DynaVis && model.time_dim > 0 {
                return Err(VisError::Config(format!(
                    "{} trains on edges without times; model.time_dim must be 0",
                    self.strategy
                )));
            }
        }
        Ok(())
    }

    /// `<content>/visualize/<vis_id>`
    pub fn vis_dir(&self) -> PathBuf {
        self.content_path.join("visualize").join(&self.vis_id)
    }

    /// Network layout for a `dim`-wide representation.
    pub fn model_for(&self, dim: usize) -> Result<ModelConfig> {
        let model = match (&self.model, self.strategy) {
            (Some(m), _) => m.clone(),
            (None, StrategyKind::DynaVis) => ModelConfig::time_conditioned(
                dim,
                self.dynavis.hidden,
                self.dynavis.depth,
                self.dynavis.time_dim,
            ),
            (None, _) => ModelConfig::for_input_dim(dim),
        };
        if model.input_dim() != dim {
            return Err(VisError::Shape(format!(
                "model expects {}-dimensional input, representation is {}",
                model.input_dim(),
                dim
            )));
        }
        Ok(model)
    }
}
