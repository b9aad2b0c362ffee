use std::io;
use std::path::PathBuf;

use gantry_verify::ContentHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("no data from {url} for {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("{url} served {content_type} where binary content was expected")]
    UnexpectedContentType { url: String, content_type: String },

    #[error("{url} ended after {received} of {declared} bytes")]
    Truncated {
        url:      String,
        received: u64,
        declared: u64,
    },

    #[error("{url} sent {received} bytes, more than the declared {declared}")]
    Oversized {
        url:      String,
        received: u64,
        declared: u64,
    },

    #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        url:      String,
        expected: ContentHash,
        actual:   ContentHash,
    },

    #[error("download canceled")]
    Canceled,

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("hashing task failed: {0}")]
    Task(String),
}

impl FetchError {
    /// Transient failures worth fetching again from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::Truncated { .. }
                | Self::Oversized { .. }
                | Self::HashMismatch { .. }
        )
    }

    /// Timeouts and length disagreements are network failures with a specific cause.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::Truncated { .. } | Self::Oversized { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
