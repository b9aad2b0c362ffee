use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{Error, Result};

/// Staging folder for a destination directory, promoted with one swap.
///
/// Dropping an uncommitted workspace removes the staging folder, so every
/// early return or cancellation cleans up after itself.
pub struct Workspace {
    staging:     PathBuf,
    destination: PathBuf,
    committed:   bool,
}

impl Workspace {
    /// Stage next to `destination`, in `<parent>/.<name>.staging-<tag>`.
    ///
    /// Keeping the staging folder beside the destination puts both on one
    /// filesystem, so [`commit`](Self::commit) is a rename.
    pub fn beside(destination: impl Into<PathBuf>, tag: &str) -> Result<Self> {
        let destination = destination.into();
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = destination.with_file_name(format!(".{name}.staging-{tag}"));
        Self::new(staging, destination)
    }

    /// Stage in an explicit folder; it must share a filesystem with `destination`.
    pub fn new(staging: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Result<Self> {
        let staging = staging.into();
        fs::create_dir_all(&staging).map_err(|source| Error::Write {
            path: staging.clone(),
            source,
        })?;

        Ok(Self {
            staging,
            destination: destination.into(),
            committed: false,
        })
    }

    pub fn path(&self) -> &Path { &self.staging }

    pub fn destination(&self) -> &Path { &self.destination }

    /// Swap the staged tree into the destination, replacing what was there.
    pub fn commit(mut self) -> Result<PathBuf> {
        crate::replace_dir(&self.staging, &self.destination)?;
        self.committed = true;
        Ok(self.destination.clone())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.committed || !self.staging.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.staging) {
            warn!(path = %self.staging.display(), error = %e, "failed to remove staging folder");
        }
    }
}
