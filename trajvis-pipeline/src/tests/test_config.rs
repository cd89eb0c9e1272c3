use std::io::Write;

use trajvis_core::error::VisError;
use trajvis_core::model::ModelConfig;
use trajvis_core::temporal::TemporalPolicy;

use crate::config::{StrategyKind, VisConfig};

#[test]
fn test_minimal_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vis.json");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"{{"content_path": "/data/run", "strategy": "TimeVis", "temporal": {{"policy": "Global"}}}}"#
    )
    .unwrap();

    let config = VisConfig::from_file(&path).unwrap();
    assert_eq!(config.strategy, StrategyKind::TimeVis);
    assert_eq!(config.temporal.policy, TemporalPolicy::Global);
    assert_eq!(config.temporal.window, 3, "unset fields keep their defaults");
    assert_eq!(config.graph.n_neighbors, 15);
    assert_eq!(config.subject_model, "linear_softmax");
    assert_eq!(config.sampler.repeat, 5.0);
    assert_eq!(config.graph.n_epochs, 5);
    assert_eq!(config.temporal.n_epochs, 5);
    assert_eq!(
        config.vis_dir(),
        std::path::PathBuf::from("/data/run/visualize/vis")
    );
}

#[test]
fn test_json_round_trip() {
    let mut config = VisConfig::default();
    config.strategy = StrategyKind::DynaVis;
    config.dynavis.hidden = 64;
    config.classes = vec!["cat".into(), "dog".into()];

    let json = serde_json::to_string(&config).unwrap();
    let back: VisConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.strategy, StrategyKind::DynaVis);
    assert_eq!(back.dynavis.hidden, 64);
    assert_eq!(back.classes, config.classes);
    assert_eq!(back.train.patience, config.train.patience);
}

#[test]
fn test_validation_rejects_bad_values() {
    let zero_res = VisConfig {
        resolution: 0,
        ..VisConfig::default()
    };
    assert!(matches!(zero_res.validate(), Err(VisError::Config(_))));

    let mut plain_dynavis = VisConfig {
        strategy: StrategyKind::DynaVis,
        model: Some(ModelConfig::for_input_dim(16)),
        ..VisConfig::default()
    };
    assert!(
        matches!(plain_dynavis.validate(), Err(VisError::Config(_))),
        "DynaVis must refuse a model without time conditioning"
    );
    plain_dynavis.model = None;
    assert!(plain_dynavis.validate().is_ok());
}

#[test]
fn test_edge_strategies_reject_time_conditioned_model() {
    for strategy in [StrategyKind::Dvi, StrategyKind::TimeVis] {
        let config = VisConfig {
            strategy,
            model: Some(ModelConfig::time_conditioned(16, 32, 2, 8)),
            ..VisConfig::default()
        };
        assert!(
            matches!(config.validate(), Err(VisError::Config(_))),
            "{strategy} edges carry no times"
        );
        let plain = VisConfig {
            strategy,
            model: Some(ModelConfig::for_input_dim(16)),
            ..VisConfig::default()
        };
        assert!(plain.validate().is_ok());
    }
}

#[test]
fn test_model_layout_per_strategy() {
    let dvi = VisConfig::default();
    let m = dvi.model_for(32).unwrap();
    assert_eq!(m.input_dim(), 32);
    assert_eq!(m.latent_dim(), 2);
    assert_eq!(m.time_dim, 0);

    let dyna = VisConfig {
        strategy: StrategyKind::DynaVis,
        ..VisConfig::default()
    };
    let m = dyna.model_for(32).unwrap();
    assert_eq!(m.time_dim, dyna.dynavis.time_dim);
    assert_eq!(m.encoder_dims.len(), dyna.dynavis.depth + 2);

    let explicit = VisConfig {
        model: Some(ModelConfig::for_input_dim(8)),
        ..VisConfig::default()
    };
    assert!(
        matches!(explicit.model_for(16), Err(VisError::Shape(_))),
        "an explicit layout must match the representation width"
    );
}
