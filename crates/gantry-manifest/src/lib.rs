//! Version manifests and the resolver that diffs them against the store.
//!
//! A [`Manifest`] is an ordered list of [`ManifestEntry`] values, each
//! naming a file inside the assembled package and where its bytes come from.
//! [`ManifestResolver::resolve`] validates the manifest and splits it into
//! entries already in the [`ContentStore`](gantry_store::ContentStore) and
//! entries that must be downloaded, without touching the network.
//!
//! Manifests are looked up per version through a [`ManifestSource`];
//! [`VersionHandle`] defers that lookup until [`VersionHandle::resolve`] is
//! called and memoizes the result.

mod entry;
mod error;
mod handle;
mod resolver;
mod source;

pub use entry::{Manifest, ManifestEntry, SourceRef};
pub use error::{ManifestError, Result};
pub use handle::VersionHandle;
pub use resolver::{FetchPlan, ManifestResolver, Resolution};
pub use source::{DirectorySource, DownloadableInfo, ManifestSource, StaticSource};
