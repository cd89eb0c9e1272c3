//! Per-epoch artifacts of a trained run.
//!
//! ```text
//! <vis_dir>/epochs/epoch_{k}/projection.json
//! <vis_dir>/epochs/epoch_{k}/background.png
//! <vis_dir>/summary.json
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use trajvis_core::backend::AutoDevice;
use trajvis_core::data::Matrix;
use trajvis_core::error::{Result, VisError};
use trajvis_core::metrics::{NeighborQuality, projection_quality};

use crate::config::VisConfig;
use crate::projector::Projector;
use crate::render::{BackgroundRenderer, ViewBox};
use crate::store::SnapshotSource;
use crate::subject::{SubjectModel, SubjectSource};

pub const PROJECTION_FILE: &str = "projection.json";
pub const BACKGROUND_FILE: &str = "background.png";
pub const SUMMARY_FILE: &str = "summary.json";

/// Padding of the shared view box, as a fraction of its extent.
const VIEW_PAD: f32 = 0.1;

/// Agreement of `predict(x)` with `predict(decode(encode(x)))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundTrip {
    pub agree: Vec<bool>,
    pub rate: f32,
}

impl RoundTrip {
    /// Samples whose class flips through the round trip.
    pub fn misleading(&self) -> Vec<usize> {
        self.agree
            .iter()
            .enumerate()
            .filter(|(_, ok)| !**ok)
            .map(|(i, _)| i)
            .collect()
    }
}

/// `projection` is `x` already encoded by the epoch's model.
pub fn round_trip_consistency(
    projector: &Projector,
    subject: &dyn SubjectModel,
    epoch: usize,
    x: &Matrix,
    projection: &Matrix,
) -> Result<RoundTrip> {
    let original = subject.predict(x)?;
    let reconstructed = subject.predict(&projector.inverse(epoch, projection)?)?;
    let agree: Vec<bool> = original
        .iter()
        .zip(&reconstructed)
        .map(|(a, b)| a == b)
        .collect();
    let rate = if agree.is_empty() {
        1.0
    } else {
        agree.iter().filter(|ok| **ok).count() as f32 / agree.len() as f32
    };
    Ok(RoundTrip { agree, rate })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub consistency: f32,
    pub quality: Option<NeighborQuality>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub view: ViewBox,
    pub epochs: Vec<EpochSummary>,
}

pub struct ResultGenerator {
    vis_dir: PathBuf,
    quality_k: usize,
    projector: Projector,
    renderer: BackgroundRenderer,
}

impl ResultGenerator {
    pub fn new(config: &VisConfig, device: AutoDevice) -> Self {
        Self {
            vis_dir: config.vis_dir(),
            quality_k: config.quality_k,
            projector: Projector::from_config(config, device),
            renderer: BackgroundRenderer::new(config.resolution, config.projection_batch),
        }
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    fn epoch_dir(&self, epoch: usize) -> PathBuf {
        self.vis_dir.join("epochs").join(format!("epoch_{}", epoch))
    }

    /// Project every trained epoch, then render all backgrounds inside one
    /// view box framed on the later two thirds of the run.
    pub fn generate(
        &self,
        source: &dyn SnapshotSource,
        subjects: &dyn SubjectSource,
    ) -> Result<ResultSummary> {
        log::info!("╔═══════════════════════════════════════════════════════╗");
        log::info!("║  RESULTS                                              ║");
        log::info!("╚═══════════════════════════════════════════════════════╝");

        let mut projected = Vec::new();
        for epoch in source.available_epochs()? {
            if !self.projector.has_model(epoch) {
                log::warn!("  ⚠ epoch {} has no trained model, skipped", epoch);
                continue;
            }
            let snapshot = source.load(epoch)?;
            let projection = self.projector.project(epoch, &snapshot.representation)?;
            projection.save_json(&self.epoch_dir(epoch).join(PROJECTION_FILE))?;
            projected.push((snapshot, projection));
        }
        if projected.is_empty() {
            return Err(VisError::NotTrained {
                key: self.vis_dir.display().to_string(),
            });
        }

        let framed: Vec<&Matrix> = projected[projected.len() / 3..]
            .iter()
            .map(|(_, p)| p)
            .collect();
        let view = ViewBox::from_points(&framed, VIEW_PAD)?;
        log::info!(
            "  • view x∈[{:.3}, {:.3}] y∈[{:.3}, {:.3}]",
            view.x_min,
            view.x_max,
            view.y_min,
            view.y_max
        );

        let mut epochs = Vec::with_capacity(projected.len());
        for (snapshot, projection) in &projected {
            let epoch = snapshot.epoch;
            let subject = subjects.subject(epoch)?;

            let background = self
                .renderer
                .render(epoch, &view, &self.projector, subject.as_ref())?;
            background.save(&self.epoch_dir(epoch).join(BACKGROUND_FILE))?;

            let round_trip = round_trip_consistency(
                &self.projector,
                subject.as_ref(),
                epoch,
                &snapshot.representation,
                projection,
            )?;
            let quality = if self.quality_k > 0 {
                Some(projection_quality(&snapshot.representation, projection, self.quality_k)?)
            } else {
                None
            };
            log::info!(
                "  ✓ epoch {}: round-trip agreement {:.1}%{}",
                epoch,
                round_trip.rate * 100.0,
                quality
                    .map(|q| format!(", T={:.3} C={:.3}", q.trustworthiness, q.continuity))
                    .unwrap_or_default()
            );
            epochs.push(EpochSummary {
                epoch,
                consistency: round_trip.rate,
                quality,
            });
        }

        let summary = ResultSummary { view, epochs };
        let file = std::fs::File::create(self.vis_dir.join(SUMMARY_FILE))?;
        serde_json::to_writer_pretty(file, &summary)?;
        Ok(summary)
    }
}
