use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::command::{CommandRunner, ToolCommand};
use crate::error::AssemblyError;

/// One file to place into the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePiece {
    pub source:      PathBuf,
    pub target_name: String,
}

impl PackagePiece {
    pub fn new(source: impl Into<PathBuf>, target_name: impl Into<String>) -> Self {
        Self {
            source:      source.into(),
            target_name: target_name.into(),
        }
    }
}

/// Builds a package file from pieces, in the order given.
#[async_trait]
pub trait PackageAssembler: Send + Sync {
    async fn assemble(&self, pieces: &[PackagePiece], package: &Path) -> Result<(), AssemblyError>;
}

/// Writes a deflate-compressed zip in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipAssembler;

impl ZipAssembler {
    pub fn assemble_blocking(&self, pieces: &[PackagePiece], package: &Path) -> Result<(), AssemblyError> {
        let write_err = |source| AssemblyError::Write {
            path: package.to_path_buf(),
            source,
        };
        let zip_err = |source| AssemblyError::Zip {
            path: package.to_path_buf(),
            source,
        };

        let file = File::create(package).map_err(write_err)?;
        let mut zip = ZipWriter::new(BufWriter::new(file));

        for piece in pieces {
            let mut input = File::open(&piece.source).map_err(|source| AssemblyError::ReadPiece {
                path: piece.source.clone(),
                source,
            })?;
            let size = input.metadata().map(|m| m.len()).unwrap_or_default();
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .large_file(size >= u64::from(u32::MAX));

            zip.start_file(piece.target_name.as_str(), options).map_err(zip_err)?;
            io::copy(&mut input, &mut zip).map_err(write_err)?;
        }

        let mut writer = zip.finish().map_err(zip_err)?;
        writer.flush().map_err(write_err)?;
        debug!(package = %package.display(), pieces = pieces.len(), "assembled zip package");
        Ok(())
    }
}

#[async_trait]
impl PackageAssembler for ZipAssembler {
    async fn assemble(&self, pieces: &[PackagePiece], package: &Path) -> Result<(), AssemblyError> {
        let pieces = pieces.to_vec();
        let package = package.to_path_buf();
        tokio::task::spawn_blocking(move || ZipAssembler.assemble_blocking(&pieces, &package))
            .await
            .map_err(|e| AssemblyError::Task(e.to_string()))?
    }
}

/// Writes a gzip-compressed tarball in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzAssembler;

impl TarGzAssembler {
    pub fn assemble_blocking(&self, pieces: &[PackagePiece], package: &Path) -> Result<(), AssemblyError> {
        let write_err = |source| AssemblyError::Write {
            path: package.to_path_buf(),
            source,
        };

        let file = File::create(package).map_err(write_err)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut tar = tar::Builder::new(encoder);
        tar.mode(tar::HeaderMode::Deterministic);

        for piece in pieces {
            let mut input = File::open(&piece.source).map_err(|source| AssemblyError::ReadPiece {
                path: piece.source.clone(),
                source,
            })?;
            tar.append_file(&piece.target_name, &mut input).map_err(write_err)?;
        }

        let mut writer = tar.into_inner().map_err(write_err)?.finish().map_err(write_err)?;
        writer.flush().map_err(write_err)?;
        debug!(package = %package.display(), pieces = pieces.len(), "assembled tarball package");
        Ok(())
    }
}

#[async_trait]
impl PackageAssembler for TarGzAssembler {
    async fn assemble(&self, pieces: &[PackagePiece], package: &Path) -> Result<(), AssemblyError> {
        let pieces = pieces.to_vec();
        let package = package.to_path_buf();
        tokio::task::spawn_blocking(move || TarGzAssembler.assemble_blocking(&pieces, &package))
            .await
            .map_err(|e| AssemblyError::Task(e.to_string()))?
    }
}

/// Delegates assembly to an external program.
///
/// The pieces are written to a list file, one `source<TAB>target` pair per
/// line, next to the package. Arguments may reference `{list}` and
/// `{package}`.
#[derive(Debug, Clone)]
pub struct ToolAssembler<R> {
    runner:  R,
    command: ToolCommand,
}

impl<R: CommandRunner> ToolAssembler<R> {
    pub fn new(runner: R, command: ToolCommand) -> Self { Self { runner, command } }
}

#[async_trait]
impl<R: CommandRunner> PackageAssembler for ToolAssembler<R> {
    async fn assemble(&self, pieces: &[PackagePiece], package: &Path) -> Result<(), AssemblyError> {
        let list = package.with_extension("pieces");
        let contents: String = pieces
            .iter()
            .map(|p| format!("{}\t{}\n", p.source.display(), p.target_name))
            .collect();
        tokio::fs::write(&list, contents)
            .await
            .map_err(|source| AssemblyError::Write {
                path: list.clone(),
                source,
            })?;

        let result = self
            .command
            .run(&self.runner, &[("list", list.as_path()), ("package", package)])
            .await;
        if let Err(e) = tokio::fs::remove_file(&list).await {
            debug!(path = %list.display(), error = %e, "failed to remove piece list");
        }
        result?;

        if !fs::metadata(package).map(|m| m.is_file()).unwrap_or(false) {
            return Err(AssemblyError::MissingOutput {
                path: package.to_path_buf(),
            });
        }
        Ok(())
    }
}
