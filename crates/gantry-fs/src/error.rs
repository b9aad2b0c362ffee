use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to replace directory {path}: {source}")]
    ReplaceDir { path: PathBuf, source: io::Error },

    #[error("{path} is locked by another install")]
    Locked { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, Error>;
