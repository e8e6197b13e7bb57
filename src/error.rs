//! Error taxonomy for the retrieval pipeline.
//!
//! Each variant maps to one stage of the pipeline, so a failure always names
//! the collaborator that produced it. Errors propagate immediately with `?`;
//! the only tolerated degradation is per-field numeric coercion during
//! catalog loading, which never surfaces here.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The catalog file is missing or is not valid line-delimited JSON.
    #[error("failed to load catalog {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// The persisted index is missing tables, corrupt, or was built with an
    /// incompatible embedding configuration.
    #[error("index {} is unusable: {reason}", path.display())]
    Index { path: PathBuf, reason: String },

    /// The embedding provider is unreachable or returned a malformed batch.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The generative model is unreachable or returned an error.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The configuration file is missing, unparsable, or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn index(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Index {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
