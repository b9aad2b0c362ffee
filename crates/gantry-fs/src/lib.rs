//! Filesystem building blocks for atomic installs.
//!
//! - [`Workspace`] - a private staging directory removed on drop unless committed
//! - [`replace_dir`] - swap a staged directory into its public location
//! - [`TempPath`] - a temporary file path deleted on drop unless kept
//! - [`FolderLock`] - exclusive advisory lock on an install folder name

mod error;
mod lock;
mod replace;
mod temp;
mod workspace;

pub use error::{Error, Result};
pub use lock::FolderLock;
pub use replace::replace_dir;
pub use temp::TempPath;
pub use workspace::Workspace;
