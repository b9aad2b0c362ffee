use std::io::{self, Read};

use crate::error::{Result, VerifyError};
use crate::hash::ContentHash;
use crate::hasher::Hasher;

/// Reader adapter that hashes every byte passing through it.
///
/// Wrap a source, copy it wherever it needs to go, then call
/// [`HashingReader::finish`] or [`HashingReader::verify`].
pub struct HashingReader<R, H> {
    reader: R,
    hasher: H,
    bytes:  u64,
}

impl<R, H> HashingReader<R, H> {
    pub fn new(reader: R, hasher: H) -> Self {
        Self {
            reader,
            hasher,
            bytes: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 { self.bytes }
}

impl<R, H: Hasher> HashingReader<R, H> {
    pub fn finish(self) -> ContentHash { self.hasher.finalize() }

    /// Finalize and compare against the expected digest.
    pub fn verify(self, expected: &ContentHash) -> Result<ContentHash> {
        let actual = self.hasher.finalize();
        if actual == *expected {
            Ok(actual)
        } else {
            Err(VerifyError::Mismatch {
                expected: *expected,
                actual,
            })
        }
    }
}

impl<R: Read, H: Hasher> Read for HashingReader<R, H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes += n as u64;
        }
        Ok(n)
    }
}
