//! Streaming downloads with integrity verification.
//!
//! [`Fetcher::fetch`] opens a streamed GET through an [`HttpClient`], writes
//! the body to a destination file in fixed-size buffers and hashes each
//! buffer on a separate blocking task while its write is pending. Every
//! failure path (including cancellation) deletes the destination before the
//! error is returned.
//!
//! Retrying is left to the caller; [`retry_delay`] computes the backoff.

mod error;
mod fetcher;
mod http;
mod memory;
mod retry;
mod validation;

pub use error::{FetchError, Result};
pub use fetcher::{CHUNK_SIZE, Fetcher};
pub use http::{BoxStream, HttpClient, HttpResponse};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use memory::{MemoryClient, MemoryError, MemoryResponse};
pub use retry::{MAX_RETRY_DELAY, retry_delay};
pub use validation::{is_success, is_textual_content_type};
