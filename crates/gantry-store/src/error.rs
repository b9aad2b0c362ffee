use std::io;
use std::path::PathBuf;

use gantry_verify::ContentHash;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("blob {0} is not in the store")]
    NotFound(ContentHash),

    #[error("hash mismatch committing {path}: declared {declared}, actual {actual}")]
    HashMismatch {
        path:     PathBuf,
        declared: ContentHash,
        actual:   ContentHash,
    },

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("store task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, Error>;
