use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HashStoreError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("{path}:{line}: not a sha256 hex digest")]
    Corrupt { path: PathBuf, line: usize },

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HashStoreError>;
