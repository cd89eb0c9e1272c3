//! Where per-epoch representations come from.
//!
//! ```text
//! <content>/epochs/epoch_{k}/representation.json
//! <content>/epochs/epoch_{k}/subject_model.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use trajvis_core::data::{Matrix, Snapshot};
use trajvis_core::error::{Result, VisError};

const REPRESENTATION_FILE: &str = "representation.json";
pub const SUBJECT_FILE: &str = "subject_model.json";

/// Read-only access to the snapshots of one training run.
pub trait SnapshotSource {
    /// Epoch ids in ascending order.
    fn available_epochs(&self) -> Result<Vec<usize>>;

    fn load(&self, epoch: usize) -> Result<Snapshot>;

    /// Snapshots of every available epoch, in order.
    fn load_all(&self) -> Result<Vec<Snapshot>> {
        self.available_epochs()?
            .into_iter()
            .map(|e| self.load(e))
            .collect()
    }
}

/// Snapshots laid out under a content directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn epoch_dir(&self, epoch: usize) -> PathBuf {
        self.root.join("epochs").join(format!("epoch_{}", epoch))
    }

    pub fn subject_path(&self, epoch: usize) -> PathBuf {
        self.epoch_dir(epoch).join(SUBJECT_FILE)
    }

    /// Write one representation; used by producers and tests.
    pub fn save(&self, epoch: usize, representation: &Matrix) -> Result<()> {
        representation.save_json(&self.epoch_dir(epoch).join(REPRESENTATION_FILE))
    }
}

impl SnapshotSource for ContentStore {
    fn available_epochs(&self) -> Result<Vec<usize>> {
        let dir = self.root.join("epochs");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut epochs: Vec<usize> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(REPRESENTATION_FILE).is_file())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("epoch_"))
                    .and_then(|id| id.parse().ok())
            })
            .collect();
        epochs.sort_unstable();
        Ok(epochs)
    }

    fn load(&self, epoch: usize) -> Result<Snapshot> {
        let path = self.epoch_dir(epoch).join(REPRESENTATION_FILE);
        if !path.is_file() {
            return Err(VisError::MissingSnapshot { epoch });
        }
        let representation = Matrix::load_json(&path)?;
        log::debug!(
            "loaded epoch {} representation [{}×{}]",
            epoch,
            representation.rows,
            representation.cols
        );
        Ok(Snapshot::new(epoch, representation))
    }
}

/// Snapshots held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    snapshots: BTreeMap<usize, Snapshot>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, epoch: usize, representation: Matrix) {
        self.snapshots
            .insert(epoch, Snapshot::new(epoch, representation));
    }

    pub fn with(mut self, epoch: usize, representation: Matrix) -> Self {
        self.insert(epoch, representation);
        self
    }
}

impl SnapshotSource for InMemorySource {
    fn available_epochs(&self) -> Result<Vec<usize>> {
        Ok(self.snapshots.keys().copied().collect())
    }

    fn load(&self, epoch: usize) -> Result<Snapshot> {
        self.snapshots
            .get(&epoch)
            .cloned()
            .ok_or(VisError::MissingSnapshot { epoch })
    }
}
