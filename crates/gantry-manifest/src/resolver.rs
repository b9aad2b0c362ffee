use gantry_store::ContentStore;
use gantry_verify::ContentHash;
use tracing::debug;
use url::Url;

use crate::entry::{Manifest, ManifestEntry, SourceRef};
use crate::error::{ManifestError, Result};

/// A download needed to complete a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub entry:    ManifestEntry,
    pub url:      Url,
    /// Key the downloaded bytes must hash to, and will be stored under.
    pub expected: ContentHash,
}

/// A manifest split against the store, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub cached:   Vec<ManifestEntry>,
    pub to_fetch: Vec<FetchPlan>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool { self.to_fetch.is_empty() }

    /// Total number of entries.
    pub fn len(&self) -> usize { self.cached.len() + self.to_fetch.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Splits a manifest into cached and to-fetch entries.
#[derive(Debug, Clone, Default)]
pub struct ManifestResolver {
    blob_base_url: Option<Url>,
}

impl ManifestResolver {
    pub fn new() -> Self { Self::default() }

    /// Mirror serving blobs at `<base>/<hex hash>`, used for entries that
    /// only declare a hash.
    pub fn with_blob_base_url(mut self, base: Url) -> Self {
        self.blob_base_url = Some(base);
        self
    }

    /// Validate `manifest` and classify every entry.
    ///
    /// An entry is cached only if the store holds its hash right now.
    /// Everything else gets a [`FetchPlan`]. Manifest shape and declared
    /// hashes are checked before the store is consulted, so an invalid
    /// manifest causes no I/O. A hash-only entry needs a blob mirror only
    /// when its blob is missing.
    pub fn resolve(&self, manifest: &Manifest, store: &ContentStore) -> Result<Resolution> {
        manifest.validate()?;
        let keyed = manifest
            .iter()
            .map(|entry| declared_hash(entry).map(|hash| (entry, hash)))
            .collect::<Result<Vec<_>>>()?;

        let mut resolution = Resolution::default();
        for (entry, hash) in keyed {
            if store.has(&hash) {
                resolution.cached.push(entry.clone());
            } else {
                resolution.to_fetch.push(self.plan(entry)?);
            }
        }

        debug!(
            cached = resolution.cached.len(),
            to_fetch = resolution.to_fetch.len(),
            "resolved manifest"
        );
        Ok(resolution)
    }

    /// Where to download `entry` from, regardless of what the store holds.
    pub fn plan(&self, entry: &ManifestEntry) -> Result<FetchPlan> {
        let expected = declared_hash(entry)?;
        let url = match &entry.source {
            SourceRef::Remote { url, .. } => url.clone(),
            SourceRef::Content { hash } => {
                let base = self
                    .blob_base_url
                    .as_ref()
                    .ok_or_else(|| unusable(entry, "hash-only source and no blob mirror configured"))?;
                blob_url(base, hash).ok_or_else(|| unusable(entry, "blob mirror URL cannot be extended"))?
            }
        };

        Ok(FetchPlan {
            entry: entry.clone(),
            url,
            expected,
        })
    }
}

fn declared_hash(entry: &ManifestEntry) -> Result<ContentHash> {
    entry
        .hash()
        .copied()
        .ok_or_else(|| unusable(entry, "remote source declares no hash"))
}

fn unusable(entry: &ManifestEntry, reason: &'static str) -> ManifestError {
    ManifestError::NoUsableSource {
        target: entry.target_name.clone(),
        reason,
    }
}

fn blob_url(base: &Url, hash: &ContentHash) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut().ok()?.pop_if_empty().push(&hash.to_hex());
    Some(url)
}
