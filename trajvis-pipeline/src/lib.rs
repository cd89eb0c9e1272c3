pub mod config;
pub mod projector;
pub mod render;
pub mod results;
pub mod store;
pub mod strategy;
pub mod subject;

use std::path::Path;

use trajvis_core::backend::{AutoDevice, get_device, print_backend_info};
use trajvis_core::error::Result;

use crate::config::VisConfig;
use crate::results::{ResultGenerator, ResultSummary};
use crate::store::ContentStore;
use crate::strategy::{TrainReport, strategy_for};
use crate::subject::{CheckpointedSubjects, SubjectRegistry};

pub struct RunSummary {
    pub train: TrainReport,
    pub results: ResultSummary,
}

/// Load a configuration file and run every stage.
pub fn build(config_path: &Path) -> Result<RunSummary> {
    let config = VisConfig::from_file(config_path)?;
    print_backend_info();
    execute_stages(&config, &SubjectRegistry::default(), get_device())
}

/// 1. Subject model resolution
/// 2. Training of the configured strategy
/// 3. Projections, backgrounds and the summary report
pub fn execute_stages(
    config: &VisConfig,
    registry: &SubjectRegistry,
    device: AutoDevice,
) -> Result<RunSummary> {
    config.validate()?;
    log::info!("🚀 starting trajvis pipeline '{}' on {:?}", config.vis_id, device);

    // Unknown names fail before any training happens.
    let ctor = registry.resolve(&config.subject_model)?;
    let store = ContentStore::new(&config.content_path);

    let strategy = strategy_for(config);
    let train = strategy.train(&store, &device)?;
    log::info!(
        "✓ trained {} over {} epochs (final loss {:?})",
        strategy.kind(),
        train.epochs.len(),
        train.final_loss()
    );

    let subjects = CheckpointedSubjects::new(store.clone(), ctor);
    let results = ResultGenerator::new(config, device).generate(&store, &subjects)?;
    log::info!("✓ pipeline complete: {}", config.vis_dir().display());

    Ok(RunSummary { train, results })
}

#[cfg(test)]
mod tests;
