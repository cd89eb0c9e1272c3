use trajvis_core::backend::get_device;
use trajvis_core::data::Matrix;
use trajvis_core::error::VisError;

use crate::execute_stages;
use crate::results::{BACKGROUND_FILE, PROJECTION_FILE, ResultGenerator, SUMMARY_FILE};
use crate::store::ContentStore;
use crate::subject::{SharedSubject, SubjectRegistry};
use crate::tests::init;
use crate::tests::test_data::{drifting, quick_config, sign_classifier, two_clusters};

fn write_run(store: &ContentStore, epochs: &[Matrix], dim: usize) {
    for (e, m) in epochs.iter().enumerate() {
        store.save(e, m).unwrap();
        sign_classifier(dim, 1.0)
            .save(&store.subject_path(e))
            .unwrap();
    }
}

#[test]
fn test_pipeline_writes_every_artifact() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path());
    let (base, _) = two_clusters(40, 8, 2.0, 41);
    let epochs = drifting(&base, 3, 0.05, 42);
    write_run(&store, &epochs, 8);

    let mut config = quick_config(dir.path(), 8);
    config.train.max_epochs = 4;
    let summary = execute_stages(&config, &SubjectRegistry::default(), get_device()).unwrap();

    assert_eq!(summary.train.runs.len(), 3);
    assert_eq!(summary.results.epochs.len(), 3);
    let vis_dir = config.vis_dir();
    for e in 0..3 {
        let epoch_dir = vis_dir.join("epochs").join(format!("epoch_{}", e));
        let projection = Matrix::load_json(&epoch_dir.join(PROJECTION_FILE)).unwrap();
        assert_eq!((projection.rows, projection.cols), (40, 2));

        let png = image::open(epoch_dir.join(BACKGROUND_FILE)).unwrap();
        assert_eq!((png.width(), png.height()), (10, 10));
    }
    assert!(vis_dir.join(SUMMARY_FILE).is_file());

    for epoch in &summary.results.epochs {
        assert!((0.0..=1.0).contains(&epoch.consistency));
        let q = epoch.quality.expect("quality_k > 0 enables the report");
        assert!(q.trustworthiness <= 1.0 + 1e-5 && q.continuity <= 1.0 + 1e-5);
    }
    let view = summary.results.view;
    assert!(view.x_min < view.x_max && view.y_min < view.y_max);
}

#[test]
fn test_unknown_subject_fails_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quick_config(dir.path(), 8);
    config.subject_model = "vgg16".into();

    let err = execute_stages(&config, &SubjectRegistry::default(), get_device());
    assert!(matches!(err, Err(VisError::UnknownSubjectModel(_))));
    assert!(!config.vis_dir().exists(), "nothing may be trained");
}

#[test]
fn test_generator_needs_a_trained_model() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path());
    store.save(0, &Matrix::zeros(5, 8)).unwrap();

    let config = quick_config(dir.path(), 8);
    let generator = ResultGenerator::new(&config, get_device());
    let subjects = SharedSubject(std::sync::Arc::new(sign_classifier(8, 1.0)));
    assert!(matches!(
        generator.generate(&store, &subjects),
        Err(VisError::NotTrained { .. })
    ));
}
