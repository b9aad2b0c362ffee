use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{Error, Result};

/// Move `src` into place at `dest`, replacing any existing directory.
///
/// An existing `dest` is first renamed aside, then `src` is renamed into
/// place, then the old tree is removed. If the second rename fails the old
/// tree is restored, so `dest` is never left missing. Both paths must be on
/// the same filesystem.
pub fn replace_dir(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let src = src.as_ref();
    let dest = dest.as_ref();
    let replace_err = |source| Error::ReplaceDir {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| Error::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let displaced = if dest.exists() {
        let aside = aside_path(dest);
        fs::rename(dest, &aside).map_err(replace_err)?;
        Some(aside)
    } else {
        None
    };

    if let Err(e) = fs::rename(src, dest) {
        if let Some(aside) = &displaced
            && let Err(restore) = fs::rename(aside, dest)
        {
            warn!(path = %dest.display(), error = %restore, "failed to restore displaced directory");
        }
        return Err(replace_err(e));
    }

    if let Some(aside) = displaced
        && let Err(e) = fs::remove_dir_all(&aside)
    {
        warn!(path = %aside.display(), error = %e, "failed to remove displaced directory");
    }

    Ok(())
}

fn aside_path(dest: &Path) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    dest.with_file_name(format!(".{name}.old-{}", uuid::Uuid::new_v4()))
}
