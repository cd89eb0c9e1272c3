//! Error kinds surfaced by graph building, training and projection.
//!
//! Degenerate neighbor graphs and sampler overflow are recovered locally
//! (k shrinking, streaming sampler) and never appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisError {
    /// The representation of an epoch could not be found in the store.
    #[error("snapshot for epoch {epoch} is missing")]
    MissingSnapshot { epoch: usize },

    /// The subject classifier checkpoint of an epoch is absent.
    #[error("subject model for epoch {epoch} is missing at {}", path.display())]
    MissingSubjectModel {
        epoch: usize,
        path: std::path::PathBuf,
    },

    /// A projector was asked for a model that has not been trained yet.
    #[error("visualization model {key} is not trained")]
    NotTrained { key: String },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("nothing to train on: {0}")]
    EmptyTrainingSet(String),

    #[error("unknown subject model '{0}'")]
    UnknownSubjectModel(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tensor data conversion failed: {0}")]
    TensorData(String),

    #[error("checkpoint record error: {0}")]
    Record(String),

    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VisError>;

impl From<burn::record::RecorderError> for VisError {
    fn from(err: burn::record::RecorderError) -> Self {
        VisError::Record(err.to_string())
    }
}
