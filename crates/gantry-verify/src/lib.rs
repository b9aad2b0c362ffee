//! Content hashing and verification primitives.
//!
//! Every piece of a build is addressed by the SHA-256 digest of its own bytes.
//! This crate provides the [`ContentHash`] key type, an incremental
//! [`Hasher`], and a [`HashingReader`] that hashes bytes as they are copied,
//! so verification never needs a second pass over the data.
//!
//! # Example
//!
//! ```
//! use gantry_verify::{ContentHash, Hasher, Sha256Hasher};
//!
//! let mut hasher = Sha256Hasher::new();
//! hasher.update(b"hello ");
//! hasher.update(b"world");
//!
//! assert_eq!(hasher.finalize(), ContentHash::digest(b"hello world"));
//! ```

pub use self::error::{Result, VerifyError};
pub use self::hash::ContentHash;
pub use self::hasher::{Hasher, Sha256Hasher, hash_file};
pub use self::reader::HashingReader;

mod error;
mod hash;
mod hasher;
mod reader;
