use trajvis_core::backend::get_device;
use trajvis_core::checkpoint::{CheckpointKey, CheckpointStore};
use trajvis_core::data::Matrix;
use trajvis_core::error::VisError;

use crate::projector::{Projector, ProjectorMode};
use crate::store::InMemorySource;
use crate::strategy::train_vis_model;
use crate::tests::init;
use crate::tests::test_data::{
    centroid, drifting, mean_paired_distance, mean_pairwise_distance, quick_config, two_clusters,
};

/// Mean distance of the rows in `rows` to their own centroid.
fn spread(m: &Matrix, rows: &[usize]) -> f32 {
    let c = centroid(m, rows);
    rows.iter()
        .map(|&i| trajvis_core::distance::euclidean(m.row(i), &c))
        .sum::<f32>()
        / rows.len() as f32
}

#[test]
fn test_three_epoch_chain_separates_and_stays_coherent() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let (base, labels) = two_clusters(50, 16, 2.0, 11);
    let epochs = drifting(&base, 3, 0.05, 12);
    let mut source = InMemorySource::new();
    for (e, m) in epochs.iter().enumerate() {
        source.insert(e, m.clone());
    }

    let config = quick_config(dir.path(), 16);
    let report = train_vis_model(&config, &source).unwrap();
    assert_eq!(report.epochs, vec![0, 1, 2]);
    assert_eq!(report.runs.len(), 3, "one checkpoint per epoch");
    assert!(report.runs.iter().all(|r| r.loss.is_finite()));

    let store = CheckpointStore::new(config.vis_dir());
    for e in 0..3 {
        assert!(store.exists(&CheckpointKey::Epoch(e)), "epoch {} not saved", e);
    }

    let projector = Projector::from_config(&config, get_device());
    assert_eq!(projector.mode(), ProjectorMode::PerEpoch);
    let projections: Vec<Matrix> = epochs
        .iter()
        .enumerate()
        .map(|(e, m)| projector.project(e, m).unwrap())
        .collect();

    let a: Vec<usize> = (0..50).filter(|&i| labels[i] == 0).collect();
    let b: Vec<usize> = (0..50).filter(|&i| labels[i] == 1).collect();
    for (e, p) in projections.iter().enumerate() {
        assert_eq!((p.rows, p.cols), (50, 2));
        let between = trajvis_core::distance::euclidean(&centroid(p, &a), &centroid(p, &b));
        let within = spread(p, &a).max(spread(p, &b));
        assert!(
            between > within,
            "epoch {}: clusters overlap (between={:.3}, within={:.3})",
            e,
            between,
            within
        );
    }

    for e in 0..2 {
        let drift = mean_paired_distance(&projections[e], &projections[e + 1]);
        let pairwise = mean_pairwise_distance(&projections[e + 1]);
        assert!(
            drift < pairwise,
            "epoch {}→{}: samples moved {:.3}, distinct samples are {:.3} apart",
            e,
            e + 1,
            drift,
            pairwise
        );
    }

    let back = projector.inverse(2, &projections[2]).unwrap();
    assert_eq!((back.rows, back.cols), (50, 16));
    let empty = projector.project(1, &Matrix::zeros(0, 16)).unwrap();
    assert_eq!((empty.rows, empty.cols), (0, 2));
}

#[test]
fn test_single_epoch_trains_without_temporal_edges() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let (x, _) = two_clusters(40, 16, 2.0, 5);
    let source = InMemorySource::new().with(3, x);

    let report = train_vis_model(&quick_config(dir.path(), 16), &source).unwrap();
    assert_eq!(report.epochs, vec![3]);
    assert_eq!(report.runs[0].key, "epoch_3");
    assert!(report.runs[0].best_loss <= report.runs[0].loss + 1e-6);
}

#[test]
fn test_empty_source_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = train_vis_model(&quick_config(dir.path(), 16), &InMemorySource::new());
    assert!(matches!(err, Err(VisError::EmptyTrainingSet(_))));
}

#[test]
fn test_projector_reports_not_trained() {
    let dir = tempfile::tempdir().unwrap();
    let config = quick_config(dir.path(), 16);
    let projector = Projector::from_config(&config, get_device());

    assert!(!projector.has_model(0));
    match projector.project(0, &Matrix::zeros(4, 16)) {
        Err(VisError::NotTrained { key }) => assert_eq!(key, "epoch_0"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("projection without a checkpoint must fail"),
    }
    assert!(matches!(
        projector.inverse(0, &Matrix::zeros(4, 2)),
        Err(VisError::NotTrained { .. })
    ));
}
