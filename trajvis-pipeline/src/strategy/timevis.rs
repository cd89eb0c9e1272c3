//! One shared model over all epochs stacked into a single index space.

use std::sync::Arc;

use trajvis_core::backend::{AutoDevice, TrainBackend};
use trajvis_core::checkpoint::{CheckpointKey, CheckpointStore, CheckpointTarget};
use trajvis_core::data::Matrix;
use trajvis_core::error::{Result, VisError};
use trajvis_core::fuzzy::{EdgeList, FuzzyGraph, NeighborGraphBuilder};
use trajvis_core::loader::EdgeLoader;
use trajvis_core::loss::{EdgeCriterion, TemporalTerm};
use trajvis_core::sampler::EdgeSet;
use trajvis_core::temporal::{EpochStack, TemporalGraphBuilder};
use trajvis_core::trainer::Trainer;

use super::{RunRecord, TrainReport, VisStrategy};
use crate::config::{StrategyKind, VisConfig};
use crate::store::SnapshotSource;

pub struct TimeVis {
    config: VisConfig,
}

impl TimeVis {
    pub fn new(config: VisConfig) -> Self {
        Self { config }
    }
}

impl VisStrategy for TimeVis {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TimeVis
    }

    fn train(&self, source: &dyn SnapshotSource, device: &AutoDevice) -> Result<TrainReport> {
        let snapshots = source.load_all()?;
        if snapshots.is_empty() {
            return Err(VisError::EmptyTrainingSet("no snapshots available".into()));
        }
        let reps: Vec<&Matrix> = snapshots.iter().map(|s| s.representation.as_ref()).collect();
        let features = Arc::new(Matrix::vstack(&reps)?);
        let stack = EpochStack::new(reps.iter().map(|m| m.rows).collect());

        let builder = NeighborGraphBuilder::new(self.config.graph.clone());
        let graphs: Vec<FuzzyGraph> = reps.iter().map(|m| builder.build(m)).collect();

        let mut spatial = EdgeList::default();
        for (graph, &offset) in graphs.iter().zip(&stack.offsets) {
            spatial.extend(graph.edges(self.config.graph.n_epochs).offset(offset));
        }
        let graph_refs: Vec<&FuzzyGraph> = graphs.iter().collect();
        let temporal = TemporalGraphBuilder::new(self.config.temporal.clone())
            .build(&reps, &graph_refs)?;
        log::info!(
            "  • {} epochs stacked into {} points: {} spatial, {} temporal edges",
            stack.n_epochs(),
            stack.total(),
            spatial.len(),
            temporal.len()
        );

        let edges = EdgeSet::assemble(spatial, temporal, self.config.sampler.prune_threshold);
        let mut loader = EdgeLoader::new(edges, features.clone(), &self.config.sampler)?;
        let mut criterion = EdgeCriterion::<TrainBackend>::new(&self.config.loss, TemporalTerm::Dummy);

        let model_config = self.config.model_for(features.cols)?;
        let target = CheckpointTarget {
            store: CheckpointStore::new(self.config.vis_dir()),
            key: CheckpointKey::Shared,
            model: model_config.clone(),
        };
        let outcome = Trainer::new(self.config.train.clone()).fit(
            model_config.init::<TrainBackend>(device)?,
            &mut criterion,
            &mut loader,
            device,
            Some(&target),
        )?;

        let mut report = TrainReport::new(StrategyKind::TimeVis);
        report.epochs = snapshots.iter().map(|s| s.epoch).collect();
        report
            .runs
            .push(RunRecord::from_outcome(CheckpointKey::Shared.to_string(), &outcome));
        Ok(report)
    }
}
