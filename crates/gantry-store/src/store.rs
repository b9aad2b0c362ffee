use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use gantry_fs::TempPath;
use gantry_verify::{ContentHash, HashingReader, Sha256Hasher, VerifyError, hash_file};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";
/// Hex characters of the hash used as the shard directory name.
const SHARD_LEN: usize = 2;

/// A committed, immutable blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheBlob {
    pub hash:         ContentHash,
    pub size_bytes:   u64,
    pub storage_path: PathBuf,
}

/// Durable content-addressed blob store rooted at a caller-supplied folder.
///
/// Cheap to clone; clones share the same directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [root.join(OBJECTS_DIR), root.join(TMP_DIR)] {
            fs::create_dir_all(&dir).map_err(|source| Error::Write { path: dir.clone(), source })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Canonical location of the blob for `hash`, whether or not it exists.
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(OBJECTS_DIR).join(&hex[..SHARD_LEN]).join(hex)
    }

    pub fn has(&self, hash: &ContentHash) -> bool { self.blob_path(hash).is_file() }

    pub fn blob(&self, hash: &ContentHash) -> Result<CacheBlob> {
        let storage_path = self.blob_path(hash);
        match fs::metadata(&storage_path) {
            Ok(meta) if meta.is_file() => Ok(CacheBlob {
                hash: *hash,
                size_bytes: meta.len(),
                storage_path,
            }),
            Ok(_) => Err(Error::NotFound(*hash)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(*hash)),
            Err(source) => Err(Error::Read {
                path: storage_path,
                source,
            }),
        }
    }

    pub async fn open_read(&self, hash: &ContentHash) -> Result<tokio::fs::File> {
        let path = self.blob_path(hash);
        tokio::fs::File::open(&path).await.map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound(*hash),
            _ => Error::Read { path, source },
        })
    }

    /// Move the file at `temp_path` into the store under `declared`.
    ///
    /// The bytes are copied into a private file inside the store while being
    /// hashed; only a match is linked into its final path. `temp_path` is
    /// consumed (deleted) whether the commit succeeds or fails on a mismatch.
    pub async fn commit(&self, temp_path: &Path, declared: &ContentHash) -> Result<CacheBlob> {
        let store = self.clone();
        let temp_path = temp_path.to_path_buf();
        let declared = *declared;
        tokio::task::spawn_blocking(move || store.commit_blocking(&temp_path, &declared))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    pub fn commit_blocking(&self, temp_path: &Path, declared: &ContentHash) -> Result<CacheBlob> {
        let staged = TempPath::unique_in(self.root.join(TMP_DIR), &declared.to_hex());
        let result = self.stage_verified(temp_path, staged.path(), declared);

        match &result {
            Ok(_) | Err(Error::HashMismatch { .. }) => remove_consumed(temp_path),
            Err(_) => {}
        }
        let size_bytes = result?;

        let storage_path = self.blob_path(declared);
        self.publish(staged.path(), &storage_path, declared)?;

        Ok(CacheBlob {
            hash: *declared,
            size_bytes,
            storage_path,
        })
    }

    /// Re-hash a stored blob. A corrupt blob is removed and `false` returned,
    /// so the next resolve treats it as missing.
    pub async fn verify(&self, hash: &ContentHash) -> Result<bool> {
        let path = self.blob_path(hash);
        let expected = *hash;
        let actual = tokio::task::spawn_blocking(move || hash_file(&path))
            .await
            .map_err(|e| Error::Task(e.to_string()))?;

        match actual {
            Ok(actual) if actual == expected => Ok(true),
            Ok(actual) => {
                warn!(hash = %expected, %actual, "removing corrupt blob");
                let path = self.blob_path(hash);
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|source| Error::Write { path, source })?;
                Ok(false)
            }
            Err(VerifyError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(expected))
            }
            Err(VerifyError::Read { path, source }) => Err(Error::Read { path, source }),
            Err(e) => Err(Error::Task(e.to_string())),
        }
    }

    /// Copy `source` to `staged` while hashing; returns the byte count.
    fn stage_verified(&self, source: &Path, staged: &Path, declared: &ContentHash) -> Result<u64> {
        let input = File::open(source).map_err(|e| Error::Read {
            path:   source.to_path_buf(),
            source: e,
        })?;
        let write_err = |e| Error::Write {
            path:   staged.to_path_buf(),
            source: e,
        };
        let output = File::create(staged).map_err(write_err)?;

        let mut reader = HashingReader::new(input, Sha256Hasher::new());
        let mut writer = BufWriter::new(output);
        io::copy(&mut reader, &mut writer).map_err(write_err)?;
        let file = writer.into_inner().map_err(|e| write_err(e.into_error()))?;
        file.sync_all().map_err(write_err)?;

        let size = reader.bytes_read();
        match reader.verify(declared) {
            Ok(_) => Ok(size),
            Err(VerifyError::Mismatch { actual, .. }) => Err(Error::HashMismatch {
                path: source.to_path_buf(),
                declared: *declared,
                actual,
            }),
            Err(e) => Err(Error::Task(e.to_string())),
        }
    }

    /// Link a verified file into place without ever overwriting a blob.
    /// The store therefore needs a filesystem with hard links.
    fn publish(&self, staged: &Path, storage_path: &Path, hash: &ContentHash) -> Result<()> {
        if let Some(shard) = storage_path.parent() {
            fs::create_dir_all(shard).map_err(|source| Error::Write {
                path: shard.to_path_buf(),
                source,
            })?;
        }

        match fs::hard_link(staged, storage_path) {
            Ok(()) => {
                debug!(%hash, path = %storage_path.display(), "committed blob");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(%hash, "blob already present, discarding duplicate");
                Ok(())
            }
            Err(_) if storage_path.is_file() => {
                debug!(%hash, "blob published by another writer");
                Ok(())
            }
            Err(source) => Err(Error::Write {
                path: storage_path.to_path_buf(),
                source,
            }),
        }
    }
}

fn remove_consumed(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove committed temp file"),
    }
}
