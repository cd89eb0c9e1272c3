use trajvis_core::data::Matrix;
use trajvis_core::error::VisError;

use crate::store::{ContentStore, InMemorySource, SnapshotSource};

#[test]
fn test_available_epochs_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path());
    assert!(store.available_epochs().unwrap().is_empty());

    let m = Matrix::zeros(3, 4);
    for epoch in [10, 2, 0] {
        store.save(epoch, &m).unwrap();
    }
    // A folder without a representation is not an epoch.
    std::fs::create_dir_all(store.epoch_dir(7)).unwrap();
    std::fs::create_dir_all(dir.path().join("epochs").join("notes")).unwrap();

    assert_eq!(store.available_epochs().unwrap(), vec![0, 2, 10]);

    let snap = store.load(2).unwrap();
    assert_eq!(snap.epoch, 2);
    assert_eq!((snap.n_samples(), snap.dim()), (3, 4));
    assert_eq!(store.load_all().unwrap().len(), 3);
}

#[test]
fn test_missing_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path());
    assert!(matches!(
        store.load(5),
        Err(VisError::MissingSnapshot { epoch: 5 })
    ));

    let mem = InMemorySource::new().with(1, Matrix::zeros(2, 2));
    assert!(matches!(
        mem.load(0),
        Err(VisError::MissingSnapshot { epoch: 0 })
    ));
    assert_eq!(mem.available_epochs().unwrap(), vec![1]);
}
