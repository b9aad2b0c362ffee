use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::{Error, Result};

/// Exclusive advisory lock guarding one install folder name.
///
/// The lock file lives beside the folder (`<root>/.<folder>.lock`) so that it
/// survives the folder being swapped out. Released on drop.
#[derive(Debug)]
pub struct FolderLock {
    file: File,
    path: PathBuf,
}

impl FolderLock {
    fn open(root: &Path, folder: &str) -> Result<(File, PathBuf)> {
        std::fs::create_dir_all(root).map_err(|e| Error::Write {
            path:   root.to_path_buf(),
            source: e,
        })?;
        let path = root.join(format!(".{folder}.lock"));
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::Write {
                path:   path.clone(),
                source: e,
            })?;
        Ok((file, path))
    }

    /// Take the lock or fail immediately with [`Error::Locked`].
    pub fn try_acquire(root: impl AsRef<Path>, folder: &str) -> Result<Self> {
        let (file, path) = Self::open(root.as_ref(), folder)?;
        file.try_lock_exclusive().map_err(|_| Error::Locked { path: path.clone() })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl Drop for FolderLock {
    fn drop(&mut self) { let _ = FileExt::unlock(&self.file); }
}
