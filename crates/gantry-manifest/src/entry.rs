use std::collections::HashSet;
use std::path::{Component, Path};

use gantry_verify::ContentHash;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ManifestError, Result};

/// Where an entry's bytes come from.
///
/// In JSON this is flattened into the entry: `{"hash": ...}` for a blob
/// addressed only by content, `{"url": ..., "hash": ...}` for a remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    Remote {
        url:  Url,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<ContentHash>,
    },
    Content {
        hash: ContentHash,
    },
}

impl SourceRef {
    /// The content key the entry will be stored under, if declared.
    pub fn hash(&self) -> Option<&ContentHash> {
        match self {
            Self::Remote { hash, .. } => hash.as_ref(),
            Self::Content { hash } => Some(hash),
        }
    }
}

/// One file of the package: its path inside the package and its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "target")]
    pub target_name: String,
    #[serde(flatten)]
    pub source:      SourceRef,
}

impl ManifestEntry {
    pub fn content(target_name: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            target_name: target_name.into(),
            source:      SourceRef::Content { hash },
        }
    }

    pub fn remote(target_name: impl Into<String>, url: Url, hash: ContentHash) -> Self {
        Self {
            target_name: target_name.into(),
            source:      SourceRef::Remote { url, hash: Some(hash) },
        }
    }

    pub fn hash(&self) -> Option<&ContentHash> { self.source.hash() }
}

/// Ordered list of entries for one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self { Self { entries } }

    pub fn entries(&self) -> &[ManifestEntry] { &self.entries }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestEntry> { self.entries.iter() }

    /// Check target names are unique, relative paths inside the package.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !is_package_path(&entry.target_name) {
                return Err(ManifestError::InvalidTarget {
                    target: entry.target_name.clone(),
                });
            }
            if !seen.insert(entry.target_name.as_str()) {
                return Err(ManifestError::DuplicateTarget {
                    target: entry.target_name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;
    type Item = &'a ManifestEntry;

    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}

fn is_package_path(name: &str) -> bool {
    !name.is_empty() && Path::new(name).components().all(|c| matches!(c, Component::Normal(_)))
}
