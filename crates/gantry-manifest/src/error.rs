use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("target `{target}` appears more than once")]
    DuplicateTarget { target: String },

    #[error("target `{target}` is not a relative path inside the package")]
    InvalidTarget { target: String },

    #[error("target `{target}` has no usable source: {reason}")]
    NoUsableSource { target: String, reason: &'static str },

    #[error("install folder name `{folder}` is not a single path component")]
    InvalidFolder { folder: String },

    #[error("unknown version `{version}`")]
    UnknownVersion { version: String },

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path:   PathBuf,
        source: serde_json::Error,
    },
}

impl ManifestError {
    /// Errors in the manifest data itself, as opposed to failing to load it.
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTarget { .. }
                | Self::InvalidTarget { .. }
                | Self::NoUsableSource { .. }
                | Self::InvalidFolder { .. }
                | Self::Parse { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;
