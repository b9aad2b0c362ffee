use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{CommandRunner, ToolCommand};
use crate::error::ExtractionError;
use crate::sanitize::{reject_linked_path, resolve_entry, resolve_link_target};

/// Entry counts reported while extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractProgress {
    pub entries_done:  u64,
    /// Known up front for zip archives, not for streamed tarballs.
    pub entries_total: Option<u64>,
}

/// Callback receiving [`ExtractProgress`], invoked from the extracting thread.
pub type ProgressFn = Arc<dyn Fn(ExtractProgress) + Send + Sync>;

/// What an extraction produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files:       u64,
    pub directories: u64,
    pub bytes:       u64,
}

/// Unpacks an archive into an existing, empty destination directory.
///
/// Cancellation is checked between entries; on any error the destination
/// may hold a partial tree and is the caller's to discard.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<ExtractReport, ExtractionError>;
}

/// Extracts zip archives with the `zip` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl ZipExtractor {
    pub fn extract_blocking(
        &self,
        archive: &Path,
        dest: &Path,
        progress: &dyn Fn(ExtractProgress),
        cancel: &CancellationToken,
    ) -> Result<ExtractReport, ExtractionError> {
        let corrupted = |e: zip::result::ZipError| ExtractionError::Corrupted {
            path:   archive.to_path_buf(),
            reason: e.to_string(),
        };
        let file = File::open(archive).map_err(|source| ExtractionError::Open {
            path: archive.to_path_buf(),
            source,
        })?;
        let mut zip = zip::ZipArchive::new(io::BufReader::new(file)).map_err(corrupted)?;
        let total = zip.len() as u64;
        let mut report = ExtractReport::default();
        progress(ExtractProgress {
            entries_done:  0,
            entries_total: Some(total),
        });

        for index in 0..zip.len() {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Canceled);
            }
            let mut entry = zip.by_index(index).map_err(corrupted)?;
            let name = PathBuf::from(entry.name());
            let target = resolve_entry(dest, &name)?;
            reject_linked_path(dest, &target)?;

            if entry.is_dir() {
                create_dir(&target)?;
                report.directories += 1;
            } else {
                report.bytes += write_file(&target, &mut entry)?;
                apply_mode(&target, entry.unix_mode())?;
                report.files += 1;
            }

            progress(ExtractProgress {
                entries_done:  index as u64 + 1,
                entries_total: Some(total),
            });
        }

        debug!(archive = %archive.display(), files = report.files, "extracted zip");
        Ok(report)
    }
}

#[async_trait]
impl ArchiveExtractor for ZipExtractor {
    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<ExtractReport, ExtractionError> {
        let (archive, dest, cancel) = (archive.to_path_buf(), dest.to_path_buf(), cancel.clone());
        tokio::task::spawn_blocking(move || ZipExtractor.extract_blocking(&archive, &dest, &*progress, &cancel))
            .await
            .map_err(|e| ExtractionError::Task(e.to_string()))?
    }
}

/// Extracts gzip-compressed tarballs with `tar` and `flate2`.
///
/// Symlinks are kept when their target stays inside the destination; hard
/// links and special files are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzExtractor;

impl TarGzExtractor {
    pub fn extract_blocking(
        &self,
        archive: &Path,
        dest: &Path,
        progress: &dyn Fn(ExtractProgress),
        cancel: &CancellationToken,
    ) -> Result<ExtractReport, ExtractionError> {
        let corrupted = |e: io::Error| ExtractionError::Corrupted {
            path:   archive.to_path_buf(),
            reason: e.to_string(),
        };
        let file = File::open(archive).map_err(|source| ExtractionError::Open {
            path: archive.to_path_buf(),
            source,
        })?;
        let mut tar = tar::Archive::new(GzDecoder::new(io::BufReader::new(file)));
        let mut report = ExtractReport::default();
        let mut done = 0u64;
        progress(ExtractProgress {
            entries_done:  0,
            entries_total: None,
        });

        for entry in tar.entries().map_err(corrupted)? {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Canceled);
            }
            let mut entry = entry.map_err(corrupted)?;
            let name = entry.path().map_err(corrupted)?.into_owned();
            let target = resolve_entry(dest, &name)?;
            reject_linked_path(dest, &target)?;
            let kind = entry.header().entry_type();

            if kind.is_dir() {
                create_dir(&target)?;
                report.directories += 1;
            } else if kind.is_file() {
                report.bytes += write_file(&target, &mut entry)?;
                report.files += 1;
            } else if kind.is_symlink() {
                let link = entry
                    .link_name()
                    .map_err(corrupted)?
                    .ok_or_else(|| ExtractionError::UnsafePath { entry: name.clone() })?;
                resolve_link_target(dest, &target, &link)?;
                if let Some(parent) = target.parent() {
                    create_dir(parent)?;
                }
                entry
                    .unpack(&target)
                    .map_err(|source| ExtractionError::Write { path: target.clone(), source })?;
                report.files += 1;
            } else if kind.is_pax_global_extensions() || kind.is_pax_local_extensions() {
                continue;
            } else {
                return Err(ExtractionError::UnsafePath { entry: name });
            }

            done += 1;
            progress(ExtractProgress {
                entries_done:  done,
                entries_total: None,
            });
        }

        debug!(archive = %archive.display(), files = report.files, "extracted tarball");
        Ok(report)
    }
}

#[async_trait]
impl ArchiveExtractor for TarGzExtractor {
    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<ExtractReport, ExtractionError> {
        let (archive, dest, cancel) = (archive.to_path_buf(), dest.to_path_buf(), cancel.clone());
        tokio::task::spawn_blocking(move || TarGzExtractor.extract_blocking(&archive, &dest, &*progress, &cancel))
            .await
            .map_err(|e| ExtractionError::Task(e.to_string()))?
    }
}

/// Delegates extraction to an external program.
///
/// Arguments may reference `{archive}` and `{dest}`. The program reports no
/// counts, so progress is announced once when it finishes, from a walk of
/// the destination.
#[derive(Debug, Clone)]
pub struct ToolExtractor<R> {
    runner:  R,
    command: ToolCommand,
}

impl<R: CommandRunner> ToolExtractor<R> {
    pub fn new(runner: R, command: ToolCommand) -> Self { Self { runner, command } }
}

#[async_trait]
impl<R: CommandRunner> ArchiveExtractor for ToolExtractor<R> {
    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<ExtractReport, ExtractionError> {
        let vars = [("archive", archive), ("dest", dest)];
        let run = self.command.run(&self.runner, &vars);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExtractionError::Canceled),
            result = run => { result?; }
        }

        let report = survey(dest).map_err(|source| ExtractionError::Write {
            path: dest.to_path_buf(),
            source,
        })?;
        let entries = report.files + report.directories;
        progress(ExtractProgress {
            entries_done:  entries,
            entries_total: Some(entries),
        });
        Ok(report)
    }
}

fn create_dir(path: &Path) -> Result<(), ExtractionError> {
    fs::create_dir_all(path).map_err(|source| ExtractionError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(target: &Path, reader: &mut impl io::Read) -> Result<u64, ExtractionError> {
    if let Some(parent) = target.parent() {
        create_dir(parent)?;
    }
    let write_err = |source| ExtractionError::Write {
        path: target.to_path_buf(),
        source,
    };
    let mut out = File::create(target).map_err(write_err)?;
    io::copy(reader, &mut out).map_err(write_err)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<(), ExtractionError> {
    use std::os::unix::fs::PermissionsExt;

    let Some(mode) = mode.map(|m| m & 0o777).filter(|m| *m != 0) else {
        return Ok(());
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| ExtractionError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<(), ExtractionError> { Ok(()) }

/// Count what a tool left in `dir`.
fn survey(dir: &Path) -> io::Result<ExtractReport> {
    let mut report = ExtractReport::default();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                report.directories += 1;
                pending.push(entry.path());
            } else {
                report.files += 1;
                report.bytes += meta.len();
            }
        }
    }
    Ok(report)
}
