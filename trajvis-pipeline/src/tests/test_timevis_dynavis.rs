use trajvis_core::backend::get_device;
use trajvis_core::checkpoint::{CheckpointKey, CheckpointStore};
use trajvis_core::data::Matrix;
use trajvis_core::error::VisError;
use trajvis_core::normalization::NormStats;
use trajvis_core::temporal::TemporalPolicy;

use crate::config::{StrategyKind, VisConfig};
use crate::projector::{Projector, ProjectorMode};
use crate::store::InMemorySource;
use crate::strategy::dynavis::NORM_STATS_FILE;
use crate::strategy::{strategy_for, train_vis_model};
use crate::tests::init;
use crate::tests::test_data::{drifting, quick_config, two_clusters};

fn source_of(epochs: &[Matrix]) -> InMemorySource {
    let mut source = InMemorySource::new();
    for (e, m) in epochs.iter().enumerate() {
        source.insert(e + 1, m.clone());
    }
    source
}

fn dynavis_config(content: &std::path::Path) -> VisConfig {
    let mut config = VisConfig {
        content_path: content.to_path_buf(),
        strategy: StrategyKind::DynaVis,
        projection_batch: 16,
        ..VisConfig::default()
    };
    let dv = &mut config.dynavis;
    dv.epochs_ae = 3;
    dv.epochs_joint = 3;
    dv.batch_size = 8;
    dv.hidden = 16;
    dv.depth = 2;
    dv.time_dim = 4;
    dv.motion.warmup_epochs = 2;
    config
}

#[test]
fn test_strategy_factory() {
    for kind in [StrategyKind::Dvi, StrategyKind::TimeVis, StrategyKind::DynaVis] {
        let config = VisConfig {
            strategy: kind,
            ..VisConfig::default()
        };
        assert_eq!(strategy_for(&config).kind(), kind);
    }
}

#[test]
fn test_timevis_trains_one_shared_model() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let (base, _) = two_clusters(30, 8, 2.0, 21);
    let epochs = drifting(&base, 3, 0.05, 22);

    for policy in [TemporalPolicy::Local, TemporalPolicy::Global] {
        let mut config = quick_config(dir.path(), 8);
        config.strategy = StrategyKind::TimeVis;
        config.vis_id = format!("timevis_{}", policy);
        config.temporal.policy = policy;
        config.temporal.n_neighbors = 5;
        config.train.max_epochs = 3;

        let report = train_vis_model(&config, &source_of(&epochs)).unwrap();
        assert_eq!(report.epochs, vec![1, 2, 3]);
        assert_eq!(report.runs.len(), 1, "{}: one shared run", policy);
        assert_eq!(report.runs[0].key, "shared");

        let store = CheckpointStore::new(config.vis_dir());
        assert!(store.exists(&CheckpointKey::Shared));
        assert!(!store.exists(&CheckpointKey::Epoch(1)));

        let projector = Projector::from_config(&config, get_device());
        assert_eq!(projector.mode(), ProjectorMode::Shared);
        assert!(projector.has_model(1) && projector.has_model(99));
        let a = projector.project(1, &epochs[0]).unwrap();
        let b = projector.project(3, &epochs[0]).unwrap();
        assert_eq!((a.rows, a.cols), (30, 2));
        assert_eq!(a, b, "a shared model ignores the epoch");
    }
}

#[test]
fn test_dynavis_round_trip_through_stats() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let (base, _) = two_clusters(16, 6, 1.5, 31);
    let epochs = drifting(&base, 5, 0.2, 32);
    let config = dynavis_config(dir.path());

    let report = train_vis_model(&config, &source_of(&epochs)).unwrap();
    assert_eq!(report.strategy, StrategyKind::DynaVis);
    assert_eq!(report.runs[0].epochs_run, 3);
    assert!(report.runs[0].loss.is_finite());

    let stats_path = config.vis_dir().join(NORM_STATS_FILE);
    let stats = NormStats::load(&stats_path).unwrap();
    assert_eq!(stats.times, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(stats.mode, config.dynavis.stats_mode);

    let projector = Projector::from_config(&config, get_device());
    assert_eq!(projector.mode(), ProjectorMode::TimeConditioned);
    assert!(projector.has_model(2));

    let y_early = projector.project(1, &epochs[0]).unwrap();
    let y_late = projector.project(5, &epochs[0]).unwrap();
    assert_eq!((y_early.rows, y_early.cols), (16, 2));
    assert_ne!(y_early, y_late, "time conditioning must change the projection");

    let x_back = projector.inverse(3, &y_early).unwrap();
    assert_eq!((x_back.rows, x_back.cols), (16, 6));
    assert!(x_back.data.iter().all(|v| v.is_finite()));

    std::fs::remove_file(&stats_path).unwrap();
    let fresh = Projector::from_config(&config, get_device());
    assert!(!fresh.has_model(2), "stats are part of a trained run");
    assert!(matches!(
        fresh.project(2, &epochs[0]),
        Err(VisError::NotTrained { .. })
    ));
}

#[test]
fn test_dynavis_needs_aligned_trajectories() {
    let dir = tempfile::tempdir().unwrap();
    let config = dynavis_config(dir.path());

    let one = source_of(&[Matrix::zeros(4, 6)]);
    assert!(matches!(
        train_vis_model(&config, &one),
        Err(VisError::EmptyTrainingSet(_))
    ));

    let ragged = source_of(&[Matrix::zeros(4, 6), Matrix::zeros(5, 6)]);
    assert!(matches!(
        train_vis_model(&config, &ragged),
        Err(VisError::Shape(_))
    ));
}
