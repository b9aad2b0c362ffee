//! Content-addressed blob store (the "dehydrate cache").
//!
//! Blobs are keyed by the SHA-256 of their own bytes and laid out as
//!
//! ```text
//! <root>/
//!   objects/<first 2 hex chars>/<full hex hash>
//!   tmp/<unique>.part
//! ```
//!
//! A blob only appears under its final path after its bytes were hashed and
//! matched the declared key. Committed blobs are never modified; two writers
//! committing the same hash both succeed and exactly one file remains.

mod error;
mod store;

pub use error::{Error, Result};
pub use store::{CacheBlob, ContentStore};
