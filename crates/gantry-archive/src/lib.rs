//! Package assembly and archive extraction.
//!
//! - [`PackageAssembler`] turns an ordered list of `(source, target name)`
//!   pairs into one package file: [`ZipAssembler`] in-process, or
//!   [`ToolAssembler`] through an external program.
//! - [`ArchiveExtractor`] unpacks a package into a directory, reporting
//!   entry counts as it goes: [`ZipExtractor`], [`TarGzExtractor`], or
//!   [`ToolExtractor`].
//!
//! External programs run through the [`CommandRunner`] capability so tests
//! can substitute a fake. Every built-in extractor sanitizes entry paths and
//! refuses entries that would land outside the destination.

mod assemble;
mod command;
mod error;
mod extract;
mod sanitize;

pub use assemble::{PackageAssembler, PackagePiece, TarGzAssembler, ToolAssembler, ZipAssembler};
pub use command::{CommandOutput, CommandRunner, ProcessRunner, ToolCommand};
pub use error::{AssemblyError, ExtractionError, ToolError};
pub use extract::{
    ArchiveExtractor, ExtractProgress, ExtractReport, ProgressFn, TarGzExtractor, ToolExtractor, ZipExtractor,
};
pub use sanitize::{resolve_entry, resolve_link_target};
