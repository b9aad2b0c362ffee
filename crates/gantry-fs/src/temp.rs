use std::path::{Path, PathBuf};

use tracing::warn;

/// Path to a temporary file that is deleted on drop unless kept.
#[derive(Debug)]
pub struct TempPath {
    path: PathBuf,
    keep: bool,
}

impl TempPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep: false,
        }
    }

    /// A uniquely named path inside `dir`.
    pub fn unique_in(dir: impl AsRef<Path>, prefix: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{prefix}.{}.part", uuid::Uuid::new_v4())))
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Stop tracking the file and hand the path to the caller.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl AsRef<Path> for TempPath {
    fn as_ref(&self) -> &Path { &self.path }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temp file"),
        }
    }
}
