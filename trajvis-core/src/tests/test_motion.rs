use approx::assert_relative_eq;
use burn::prelude::*;
use burn::tensor::ElementConversion;

use crate::backend::{AutoBackend, get_device};
use crate::data::tensor_to_vec;
use crate::motion::{
    MotionConfig, direction_consistency, ranking_speed_loss, speed_distribution_kl, speeds,
};
use crate::tests::init;

type B = AutoBackend;

/// [1, T, dim] trajectory from a list of points.
fn seq(points: &[Vec<f32>]) -> Tensor<B, 3> {
    let t = points.len();
    let d = points[0].len();
    let data: Vec<f32> = points.iter().flatten().copied().collect();
    Tensor::from_data(TensorData::new(data, [1, t, d]), &get_device())
}

fn scalar(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

/// A 1-D path whose steps have the given lengths, embedded in `dim` dims.
fn path(steps: &[f32], dim: usize) -> Vec<Vec<f32>> {
    let mut pos = 0.0f32;
    let mut out = vec![vec![0.0; dim]];
    for s in steps {
        pos += s;
        let mut p = vec![0.0; dim];
        p[0] = pos;
        out.push(p);
    }
    out
}

#[test]
fn test_speeds_are_step_lengths() {
    init();
    let s = tensor_to_vec(speeds(seq(&path(&[1.0, 3.0, 0.5], 4)))).unwrap();
    assert_eq!(s.len(), 3);
    assert_relative_eq!(s[0], 1.0, epsilon = 1e-3);
    assert_relative_eq!(s[1], 3.0, epsilon = 1e-3);
    assert_relative_eq!(s[2], 0.5, epsilon = 1e-3);
}

#[test]
fn test_ranking_loss_zero_when_order_preserved() {
    init();
    let steps = [0.1, 5.0, 0.2, 3.0, 0.15, 4.0];
    let hi = seq(&path(&steps, 6));
    let lo = seq(&path(&steps, 2));
    let loss = scalar(ranking_speed_loss(hi.clone(), lo, 0.02, 0.01));
    assert_relative_eq!(loss, 0.0, epsilon = 1e-6);

    let reversed: Vec<f32> = steps.iter().map(|s| 1.0 / s).collect();
    let bad = seq(&path(&reversed, 2));
    let loss = scalar(ranking_speed_loss(hi, bad, 0.02, 0.01));
    assert!(loss > 0.1, "inverted speeds must be penalised, got {}", loss);
}

#[test]
fn test_ranking_loss_needs_three_steps() {
    let short = seq(&path(&[1.0, 2.0], 3));
    assert_eq!(scalar(ranking_speed_loss(short.clone(), short, 0.02, 0.01)), 0.0);
}

#[test]
fn test_speed_kl_zero_for_proportional_speeds() {
    init();
    let steps = [1.0, 2.0, 0.5, 3.0];
    let hi = seq(&path(&steps, 5));
    let scaled: Vec<f32> = steps.iter().map(|s| s * 0.1).collect();
    let lo = seq(&path(&scaled, 2));

    for weighted in [true, false] {
        let kl = scalar(speed_distribution_kl(hi.clone(), lo.clone(), 0.5, weighted, 1e-4));
        assert!(kl.abs() < 1e-4, "mean-normalised profiles match, KL={}", kl);
    }

    let flat = seq(&path(&[1.0; 4], 2));
    let kl = scalar(speed_distribution_kl(hi, flat, 0.5, false, 1e-4));
    assert!(kl > 1e-3, "different profiles must have positive KL, got {}", kl);
}

#[test]
fn test_direction_consistency() {
    init();
    // A straight line in both spaces: every cosine is 1.
    let line_hi = seq(&path(&[1.0; 8], 4));
    let line_lo = seq(&path(&[0.5; 8], 2));
    let loss = scalar(direction_consistency(line_hi.clone(), line_lo, &[2, 4], 1e-4, 3.5, 1e-6));
    assert!(loss < 1e-3, "aligned straight lines cost {}", loss);

    // A zig-zag image of a straight line disagrees on direction.
    let zigzag: Vec<Vec<f32>> = (0..9)
        .map(|i| vec![i as f32, if i % 2 == 0 { 0.0 } else { 3.0 }])
        .collect();
    let loss_bad = scalar(direction_consistency(line_hi, seq(&zigzag), &[2, 4], 1e-4, 3.5, 1e-6));
    assert!(loss_bad > loss, "zig-zag ({}) should cost more than a line ({})", loss_bad, loss);
}

#[test]
fn test_tau_annealing() {
    let config = MotionConfig::default();
    assert_relative_eq!(config.tau(0, 11), 0.7);
    assert_relative_eq!(config.tau(10, 11), 0.25, epsilon = 1e-6);
    let mid = config.tau(5, 11);
    assert!(mid < 0.7 && mid > 0.25);
}
