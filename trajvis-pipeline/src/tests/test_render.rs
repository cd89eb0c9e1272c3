use trajvis_core::data::Matrix;
use trajvis_core::error::Result;

use crate::render::{BackgroundRenderer, InverseMapping, TAB10, ViewBox, shade};
use crate::subject::{LinearSoftmax, SubjectModel};
use crate::tests::init;

/// Decodes a 2-D point to itself.
struct Identity;

impl InverseMapping for Identity {
    fn inverse(&self, _epoch: usize, y: &Matrix) -> Result<Matrix> {
        Ok(y.clone())
    }
}

/// Class 1 right of x = 0, class 0 left of it.
fn vertical_boundary() -> LinearSoftmax {
    let w = Matrix::from_rows(&[vec![-5.0, 5.0], vec![0.0, 0.0]]).unwrap();
    LinearSoftmax::new(w, vec![0.0, 0.0]).unwrap()
}

/// Every class equally likely everywhere.
struct Undecided;

impl SubjectModel for Undecided {
    fn num_classes(&self) -> usize {
        3
    }

    fn predict_proba(&self, x: &Matrix) -> Result<Matrix> {
        Matrix::new(vec![1.0 / 3.0; x.rows * 3], x.rows, 3)
    }
}

fn unit_view() -> ViewBox {
    ViewBox {
        x_min: -1.0,
        y_min: -1.0,
        x_max: 1.0,
        y_max: 1.0,
    }
}

#[test]
fn test_view_box_padding() {
    let p = Matrix::from_rows(&[vec![0.0, 0.0], vec![10.0, 5.0]]).unwrap();
    let view = ViewBox::from_points(&[&p], 0.1).unwrap();
    approx::assert_abs_diff_eq!(view.x_min, -1.0, epsilon = 1e-5);
    approx::assert_abs_diff_eq!(view.x_max, 11.0, epsilon = 1e-5);
    approx::assert_abs_diff_eq!(view.y_min, -0.5, epsilon = 1e-5);
    approx::assert_abs_diff_eq!(view.y_max, 5.5, epsilon = 1e-5);

    let point = Matrix::from_rows(&[vec![2.0, 2.0]]).unwrap();
    let view = ViewBox::from_points(&[&point], 0.1).unwrap();
    assert!(view.width() > 0.0 && view.height() > 0.0, "a single point still gets an area");

    assert!(ViewBox::from_points(&[], 0.1).is_err());
    assert!(ViewBox::from_points(&[&Matrix::zeros(2, 3)], 0.1).is_err());
}

#[test]
fn test_grid_pixel_centres() {
    let renderer = BackgroundRenderer::new(4, 100);
    let grid = renderer.grid(&unit_view());
    assert_eq!((grid.rows, grid.cols), (16, 2));
    assert_eq!(grid.row(0), &[-0.75, -0.75]);
    assert_eq!(grid.row(1), &[-0.25, -0.75], "columns vary fastest");
    assert_eq!(grid.row(15), &[0.75, 0.75]);
}

#[test]
fn test_separable_background_follows_boundary() {
    init();
    // Batches smaller than the grid exercise the chunked decode.
    let renderer = BackgroundRenderer::new(10, 7);
    let bg = renderer
        .render(0, &unit_view(), &Identity, &vertical_boundary())
        .unwrap();

    assert_eq!(bg.image.dimensions(), (10, 10));
    for row in 0..10 {
        for col in 0..10 {
            let expected = usize::from(col >= 5);
            assert_eq!(
                bg.label_at(col, row),
                expected,
                "cell ({}, {}) on the wrong side of x = 0",
                col,
                row
            );
        }
    }

    for y in 0..10u32 {
        let left = bg.image.get_pixel(0, y);
        let right = bg.image.get_pixel(9, y);
        assert!(left[2] > left[0], "class 0 renders blue, got {:?}", left);
        assert!(right[0] > right[2], "class 1 renders orange, got {:?}", right);
    }
    assert!(bg.confidence.iter().all(|c| (0.0..=0.9 + 1e-6).contains(c)));
}

#[test]
fn test_ties_fade_to_white() {
    let renderer = BackgroundRenderer::new(5, 10);
    let bg = renderer.render(3, &unit_view(), &Identity, &Undecided).unwrap();
    assert!(bg.confidence.iter().all(|&c| c == 0.0));
    assert!(bg.image.pixels().all(|p| p.0 == [255, 255, 255]));
}

#[test]
fn test_shade_blends_towards_white() {
    assert_eq!(shade(4, 0.0).0, [255, 255, 255]);
    let full = shade(0, 1.0).0;
    for (ch, &c) in full.iter().zip(&TAB10[0]) {
        assert_eq!(*ch, ((c as f32 / 255.0) * 0.5 * 255.0).round() as u8);
    }
    assert_eq!(shade(10, 0.5), shade(0, 0.5), "palette wraps after ten classes");
}

#[test]
fn test_background_png_written() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = BackgroundRenderer::new(10, 50);
    let bg = renderer
        .render(0, &unit_view(), &Identity, &vertical_boundary())
        .unwrap();
    let path = dir.path().join("epoch_0").join("background.png");
    bg.save(&path).unwrap();

    let loaded = image::open(&path).unwrap().to_rgb8();
    assert_eq!(loaded.dimensions(), (10, 10));
    assert_eq!(loaded.get_pixel(0, 0), bg.image.get_pixel(0, 0));
}
