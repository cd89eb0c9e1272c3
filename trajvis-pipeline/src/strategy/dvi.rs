//! Chained per-epoch models.
//!
//! Epoch i continues from the model trained on epoch i−1, and a frozen copy
//! of that model anchors the temporal term. The chain is strictly ordered:
//! an epoch cannot start before its predecessor is frozen.

use std::sync::Arc;

use trajvis_core::backend::{AutoDevice, TrainBackend};
use trajvis_core::checkpoint::{CheckpointKey, CheckpointStore, CheckpointTarget};
use trajvis_core::data::Snapshot;
use trajvis_core::error::{Result, VisError};
use trajvis_core::fuzzy::{EdgeList, NeighborGraphBuilder};
use trajvis_core::loader::EdgeLoader;
use trajvis_core::loss::{EdgeCriterion, TemporalTerm};
use trajvis_core::model::{FrozenModel, VisModel};
use trajvis_core::sampler::EdgeSet;
use trajvis_core::temporal::neighbor_preserving_rate;
use trajvis_core::trainer::Trainer;

use super::{RunRecord, TrainReport, VisStrategy};
use crate::config::{StrategyKind, VisConfig};
use crate::store::SnapshotSource;

pub struct Dvi {
    config: VisConfig,
}

impl Dvi {
    pub fn new(config: VisConfig) -> Self {
        Self { config }
    }

    fn temporal_term(
        &self,
        live: &VisModel<TrainBackend>,
        prev: &Snapshot,
        curr: &Snapshot,
    ) -> Result<TemporalTerm<TrainBackend>> {
        let rates = neighbor_preserving_rate(
            Some(prev.representation.as_ref()),
            &curr.representation,
            self.config.graph.n_neighbors,
            &self.config.graph.knn,
        )?;
        let mean = rates.iter().sum::<f32>() / rates.len().max(1) as f32;
        log::debug!(
            "  • neighbour preservation {} → {}: mean={:.3}",
            prev.epoch,
            curr.epoch,
            mean
        );
        Ok(TemporalTerm::consistency(
            FrozenModel::freeze(live),
            rates,
            self.config.loss.npr_weighting,
            self.config.loss.temporal_margin,
        ))
    }
}

impl VisStrategy for Dvi {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Dvi
    }

    fn train(&self, source: &dyn SnapshotSource, device: &AutoDevice) -> Result<TrainReport> {
        let epochs = source.available_epochs()?;
        if epochs.is_empty() {
            return Err(VisError::EmptyTrainingSet("no snapshots available".into()));
        }
        let store = CheckpointStore::new(self.config.vis_dir());
        let graphs = NeighborGraphBuilder::new(self.config.graph.clone());
        let mut report = TrainReport::new(StrategyKind::Dvi);

        let mut live: Option<VisModel<TrainBackend>> = None;
        let mut prev: Option<Snapshot> = None;

        for epoch in epochs {
            let snapshot = source.load(epoch)?;
            log::info!(
                "── epoch {} ({} samples × {}) ──",
                epoch,
                snapshot.n_samples(),
                snapshot.dim()
            );
            let model_config = self.config.model_for(snapshot.dim())?;
            let model = match live.take() {
                Some(model) => model,
                None => model_config.init::<TrainBackend>(device)?,
            };

            let temporal = match &prev {
                Some(prev) => self.temporal_term(&model, prev, &snapshot)?,
                None => TemporalTerm::Dummy,
            };

            let graph = graphs.build(&snapshot.representation);
            let edges = EdgeSet::assemble(
                graph.edges(self.config.graph.n_epochs),
                EdgeList::default(),
                self.config.sampler.prune_threshold,
            );
            let mut loader = EdgeLoader::new(
                edges,
                Arc::clone(&snapshot.representation),
                &self.config.sampler,
            )?;
            let mut criterion = EdgeCriterion::new(&self.config.loss, temporal);

            let key = CheckpointKey::Epoch(epoch);
            let target = CheckpointTarget {
                store: store.clone(),
                key: key.clone(),
                model: model_config,
            };
            let outcome = Trainer::new(self.config.train.clone()).fit(
                model,
                &mut criterion,
                &mut loader,
                device,
                Some(&target),
            )?;

            report.epochs.push(epoch);
            report.runs.push(RunRecord::from_outcome(key.to_string(), &outcome));
            live = Some(outcome.model);
            prev = Some(snapshot);
        }
        Ok(report)
    }
}
