use std::io;
use std::path::PathBuf;

use gantry_archive::{AssemblyError, ExtractionError};
use gantry_fetch::FetchError;
use gantry_manifest::ManifestError;
use gantry_progress::{InvalidTransition, Step};
use gantry_verify::ContentHash;
use thiserror::Error;

use crate::state::SessionState;

#[derive(Debug, Error)]
pub enum InstallError {
    /// A failure while handling one manifest entry (or the package).
    #[error("{target}: {step} failed: {source}")]
    Entry {
        target: String,
        step:   Step,
        source: Box<InstallError>,
    },

    #[error(transparent)]
    Network(FetchError),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual:   ContentHash,
    },

    #[error("invalid manifest: {0}")]
    ManifestInvalid(#[from] ManifestError),

    #[error("package assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("extraction failed: {0}")]
    Extraction(ExtractionError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("install session cannot move from {from} to {to}")]
    InvalidState { from: SessionState, to: SessionState },

    #[error("install canceled")]
    Canceled,

    #[error("`{folder}` is being installed by another session")]
    Busy { folder: String },

    #[error("content store error: {0}")]
    Store(gantry_store::Error),

    #[error(transparent)]
    Fs(gantry_fs::Error),

    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("background task failed: {0}")]
    Task(String),
}

impl InstallError {
    /// Attach the file identifier and step that was in progress.
    pub fn in_entry(self, target: impl Into<String>, step: Step) -> Self {
        match self {
            Self::Canceled | Self::Entry { .. } => self,
            source => Self::Entry {
                target: target.into(),
                step,
                source: Box::new(source),
            },
        }
    }

    /// The error with any entry context removed.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Entry { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The entry the error is attributed to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Entry { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Transient failures: network trouble or corrupted bytes.
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Self::Network(e) => e.is_retryable(),
            Self::HashMismatch { .. } => true,
            _ => false,
        }
    }

    /// User-requested stop; not reported as a failure.
    pub fn is_cancellation(&self) -> bool { matches!(self.root_cause(), Self::Canceled) }
}

impl From<FetchError> for InstallError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Canceled => Self::Canceled,
            FetchError::HashMismatch { expected, actual, .. } => Self::HashMismatch { expected, actual },
            FetchError::Write { path, source } => Self::Io { path, source },
            FetchError::Task(message) => Self::Task(message),
            other => Self::Network(other),
        }
    }
}

impl From<gantry_store::Error> for InstallError {
    fn from(e: gantry_store::Error) -> Self {
        match e {
            gantry_store::Error::HashMismatch { declared, actual, .. } => Self::HashMismatch {
                expected: declared,
                actual,
            },
            other => Self::Store(other),
        }
    }
}

impl From<ExtractionError> for InstallError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::Canceled => Self::Canceled,
            other => Self::Extraction(other),
        }
    }
}

impl From<gantry_fs::Error> for InstallError {
    fn from(e: gantry_fs::Error) -> Self { Self::Fs(e) }
}

pub type Result<T> = std::result::Result<T, InstallError>;
