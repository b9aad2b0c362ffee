use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::ExtractionError;

/// Resolve an archive entry name against `base`.
///
/// Fails for absolute names and for `..` segments that climb above `base`;
/// `.` segments are dropped and inner `..` segments are collapsed.
pub fn resolve_entry(base: &Path, entry: impl AsRef<Path>) -> Result<PathBuf, ExtractionError> {
    let entry = entry.as_ref();
    let relative = normalize(entry).ok_or_else(|| ExtractionError::UnsafePath {
        entry: entry.to_path_buf(),
    })?;
    Ok(base.join(relative))
}

/// Resolve a symlink target, relative to the link's own directory, and
/// require it to stay inside `base`. Returns the target as written.
pub fn resolve_link_target(base: &Path, link: &Path, target: &Path) -> Result<PathBuf, ExtractionError> {
    let unsafe_link = || ExtractionError::UnsafePath {
        entry: link.to_path_buf(),
    };
    let link_dir = link.strip_prefix(base).map_err(|_| unsafe_link())?.parent().unwrap_or(Path::new(""));
    normalize(&link_dir.join(target)).ok_or_else(unsafe_link)?;
    Ok(target.to_path_buf())
}

/// Fail if `target`, or any directory between `base` and it, already exists
/// as a symlink. Writing through an extracted link could land outside `base`
/// even when every name checks out lexically.
pub fn reject_linked_path(base: &Path, target: &Path) -> Result<(), ExtractionError> {
    let relative = target.strip_prefix(base).map_err(|_| ExtractionError::UnsafePath {
        entry: target.to_path_buf(),
    })?;

    let mut current = base.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ExtractionError::UnsafePath {
                    entry: relative.to_path_buf(),
                });
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(ExtractionError::Write { path: current, source }),
        }
    }
    Ok(())
}

/// Lexically normalize a relative path; `None` if it is absolute or escapes.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn base() -> &'static Path { Path::new("/opt/game") }

    #[test]
    fn plain_entry() {
        assert_eq!(resolve_entry(base(), "bin/game").unwrap(), base().join("bin/game"));
    }

    #[test]
    fn inner_parent_dirs_collapse() {
        assert_eq!(
            resolve_entry(base(), "data/./maps/../level.pak").unwrap(),
            base().join("data/level.pak")
        );
    }

    #[test]
    fn escapes_are_rejected() {
        for bad in ["../x", "data/../../x", "/etc/passwd", "", "."] {
            assert!(
                matches!(resolve_entry(base(), bad), Err(ExtractionError::UnsafePath { .. })),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn link_targets() {
        let link = base().join("bin/current");
        assert!(resolve_link_target(base(), &link, Path::new("../lib/game.so")).is_ok());
        assert!(resolve_link_target(base(), &link, Path::new("../../etc")).is_err());
        assert!(resolve_link_target(base(), &link, Path::new("/etc/passwd")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn linked_ancestors_are_rejected() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        fs::create_dir_all(base.join("data")).unwrap();
        std::os::unix::fs::symlink("data", base.join("alias")).unwrap();

        assert!(reject_linked_path(base, &base.join("data/new/file")).is_ok());
        assert!(reject_linked_path(base, &base.join("alias/file")).is_err());
        assert!(reject_linked_path(base, &base.join("alias")).is_err());
    }
}
