use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// An external program that failed to start or exited unsuccessfully.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start `{program}`: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("`{program}` exited with {status}: {output}")]
    Failed {
        program: String,
        status:  String,
        /// Captured stderr followed by stdout.
        output:  String,
    },
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("failed to read piece {path}: {source}")]
    ReadPiece { path: PathBuf, source: io::Error },

    #[error("failed to write package {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to build zip {path}: {source}")]
    Zip {
        path:   PathBuf,
        source: zip::result::ZipError,
    },

    #[error("assembler finished without producing {path}")]
    MissingOutput { path: PathBuf },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("assembly task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to open archive {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("archive {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("archive entry '{entry}' escapes the destination")]
    UnsafePath { entry: PathBuf },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("extraction canceled")]
    Canceled,

    #[error("extraction task failed: {0}")]
    Task(String),
}
