//! Decision-boundary backgrounds.
//!
//! A pixel grid over the view box is decoded to high-D, classified by the
//! subject model of the same epoch and coloured by predicted class. Pixels
//! whose top two class probabilities are close fade to white.

use std::path::Path;

use image::{Rgb, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use trajvis_core::data::Matrix;
use trajvis_core::error::{Result, VisError};

use crate::projector::Projector;
use crate::subject::{SubjectModel, argmax};

/// Added to every probability before the margin is taken.
const PROBA_EPS: f32 = 1e-8;
/// Relative margins below this render as white.
const MARGIN_FLOOR: f32 = 0.15;

pub const TAB10: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

/// 2-D → high-D for one epoch.
pub trait InverseMapping {
    fn inverse(&self, epoch: usize, y: &Matrix) -> Result<Matrix>;
}

impl InverseMapping for Projector {
    fn inverse(&self, epoch: usize, y: &Matrix) -> Result<Matrix> {
        Projector::inverse(self, epoch, y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl ViewBox {
    /// Bounding box of all points, widened by `pad` of its extent per side.
    pub fn from_points(points: &[&Matrix], pad: f32) -> Result<Self> {
        let mut view = ViewBox {
            x_min: f32::INFINITY,
            y_min: f32::INFINITY,
            x_max: f32::NEG_INFINITY,
            y_max: f32::NEG_INFINITY,
        };
        for m in points {
            if m.cols != 2 {
                return Err(VisError::Shape(format!("view box needs 2-D points, got {}", m.cols)));
            }
            for row in m.data.chunks(2) {
                view.x_min = view.x_min.min(row[0]);
                view.x_max = view.x_max.max(row[0]);
                view.y_min = view.y_min.min(row[1]);
                view.y_max = view.y_max.max(row[1]);
            }
        }
        if !view.x_min.is_finite() || !view.y_min.is_finite() {
            return Err(VisError::Render("no points to frame".into()));
        }

        let widen = |lo: f32, hi: f32| {
            let span = hi - lo;
            let margin = if span > f32::EPSILON { span * pad } else { 0.5 };
            (lo - margin, hi + margin)
        };
        (view.x_min, view.x_max) = widen(view.x_min, view.x_max);
        (view.y_min, view.y_max) = widen(view.y_min, view.y_max);
        Ok(view)
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }
}

/// Class colour faded towards white by `1 − strength`.
pub fn shade(class: usize, strength: f32) -> Rgb<u8> {
    let c = TAB10[class % TAB10.len()];
    let mix = |v: u8| {
        let v = v as f32 / 255.0;
        ((strength * 0.5 * v + (1.0 - strength)) * 255.0).round().clamp(0.0, 255.0) as u8
    };
    Rgb([mix(c[0]), mix(c[1]), mix(c[2])])
}

/// Relative top-1/top-2 margin of every row, floored and rescaled to [0, 0.9].
fn confidence(proba: &Matrix) -> Vec<f32> {
    let raw: Vec<f32> = proba
        .data
        .par_chunks(proba.cols.max(1))
        .map(|row| {
            let mut sorted: Vec<f32> = row.iter().map(|p| p + PROBA_EPS).collect();
            sorted.sort_unstable_by(|a, b| b.total_cmp(a));
            let top1 = sorted[0];
            let top2 = sorted.get(1).copied().unwrap_or(top1);
            let min = sorted[sorted.len() - 1];
            let range = top1 - min;
            let diff = if range > 0.0 { (top1 - top2) / range } else { 0.0 };
            if diff < MARGIN_FLOOR { 0.0 } else { diff }
        })
        .collect();
    let max = raw.iter().copied().fold(0.0f32, f32::max);
    raw.into_iter().map(|d| d / (max + PROBA_EPS) * 0.9).collect()
}

pub struct Background {
    pub view: ViewBox,
    pub resolution: usize,
    /// Predicted class per grid cell, row-major with row 0 at `y_min`.
    pub labels: Vec<usize>,
    pub confidence: Vec<f32>,
    /// Row 0 is the top of the view (`y_max`).
    pub image: RgbImage,
}

impl Background {
    pub fn label_at(&self, col: usize, row: usize) -> usize {
        self.labels[row * self.resolution + col]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.image
            .save(path)
            .map_err(|e| VisError::Render(format!("{}: {e}", path.display())))
    }
}

pub struct BackgroundRenderer {
    pub resolution: usize,
    pub batch_size: usize,
}

impl BackgroundRenderer {
    pub fn new(resolution: usize, batch_size: usize) -> Self {
        Self {
            resolution: resolution.max(1),
            batch_size: batch_size.max(1),
        }
    }

    /// Pixel centres, [res², 2]; column index varies fastest.
    pub fn grid(&self, view: &ViewBox) -> Matrix {
        let res = self.resolution;
        let dx = view.width() / res as f32;
        let dy = view.height() / res as f32;
        let mut data = Vec::with_capacity(res * res * 2);
        for j in 0..res {
            let y = view.y_min + (j as f32 + 0.5) * dy;
            for i in 0..res {
                data.push(view.x_min + (i as f32 + 0.5) * dx);
                data.push(y);
            }
        }
        Matrix {
            rows: res * res,
            cols: 2,
            data,
        }
    }

    pub fn render(
        &self,
        epoch: usize,
        view: &ViewBox,
        inverse: &dyn InverseMapping,
        subject: &dyn SubjectModel,
    ) -> Result<Background> {
        let res = self.resolution;
        let grid = self.grid(view);

        let mut probas = Vec::with_capacity(grid.rows.div_ceil(self.batch_size));
        for start in (0..grid.rows).step_by(self.batch_size) {
            let end = (start + self.batch_size).min(grid.rows);
            let decoded = inverse.inverse(epoch, &grid.slice_rows(start, end))?;
            probas.push(subject.predict_proba(&decoded)?);
        }
        let refs: Vec<&Matrix> = probas.iter().collect();
        let proba = Matrix::vstack(&refs)?;

        let labels: Vec<usize> = (0..proba.rows).map(|i| argmax(proba.row(i))).collect();
        let confidence = confidence(&proba);

        let mut image = RgbImage::new(res as u32, res as u32);
        for (cell, (&label, &strength)) in labels.iter().zip(&confidence).enumerate() {
            let (row, col) = (cell / res, cell % res);
            image.put_pixel(col as u32, (res - 1 - row) as u32, shade(label, strength));
        }
        log::debug!("  • background epoch {}: {}×{} px", epoch, res, res);

        Ok(Background {
            view: *view,
            resolution: res,
            labels,
            confidence,
            image,
        })
    }
}
