//! Install sessions.
//!
//! An [`InstallSession`] turns a resolved version into a folder under the
//! install root:
//!
//! ```text
//! Pending -> Resolving -> Fetching -> Assembling -> Extracting -> Finalizing -> Completed
//!                 \____________\____________\____________\____________\-> Failed | Canceled
//! ```
//!
//! Missing pieces are downloaded concurrently (bounded by
//! [`InstallConfig::max_concurrent_downloads`]) and committed to the
//! content store, the package is assembled from store blobs in manifest
//! order, then extracted into a staging folder that replaces the install
//! folder in one rename. The install folder is never observed half written.

mod config;
mod error;
mod session;
mod state;

pub use config::{InstallConfig, PackageFormat};
pub use error::{InstallError, Result};
pub use session::{InstallOutcome, InstallSession, Installer};
pub use state::SessionState;
