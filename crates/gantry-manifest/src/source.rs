use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entry::Manifest;
use crate::error::{ManifestError, Result};

/// Everything needed to download and install one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadableInfo {
    pub version:     String,
    /// Subfolder of the install root this version is installed into.
    pub folder_name: String,
    pub manifest:    Manifest,
}

impl DownloadableInfo {
    pub fn new(version: impl Into<String>, folder_name: impl Into<String>, manifest: Manifest) -> Self {
        Self {
            version: version.into(),
            folder_name: folder_name.into(),
            manifest,
        }
    }

    /// Reject folder names that are not a single plain path component.
    pub fn validate(&self) -> Result<()> {
        if !is_single_component(&self.folder_name) {
            return Err(ManifestError::InvalidFolder {
                folder: self.folder_name.clone(),
            });
        }
        self.manifest.validate()
    }
}

/// Looks up the manifest of a version.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn load(&self, version: &str) -> Result<DownloadableInfo>;
}

/// On-disk layout of `<dir>/<version>.json`.
#[derive(Deserialize)]
struct ManifestFile {
    #[serde(default)]
    folder:  Option<String>,
    entries: Manifest,
}

/// Reads `<dir>/<version>.json`.
///
/// The file holds `{"folder": ..., "entries": [...]}`; `folder` defaults to
/// the version id.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn dir(&self) -> &Path { &self.dir }

    fn manifest_path(&self, version: &str) -> Option<PathBuf> {
        is_single_component(version).then(|| self.dir.join(format!("{version}.json")))
    }
}

#[async_trait]
impl ManifestSource for DirectorySource {
    async fn load(&self, version: &str) -> Result<DownloadableInfo> {
        let unknown = || ManifestError::UnknownVersion {
            version: version.to_owned(),
        };
        let path = self.manifest_path(version).ok_or_else(unknown)?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(unknown()),
            Err(source) => return Err(ManifestError::Read { path, source }),
        };
        let file: ManifestFile =
            serde_json::from_slice(&bytes).map_err(|source| ManifestError::Parse { path, source })?;

        Ok(DownloadableInfo {
            version:     version.to_owned(),
            folder_name: file.folder.unwrap_or_else(|| version.to_owned()),
            manifest:    file.entries,
        })
    }
}

/// In-memory source, for embedding a fixed catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    versions: HashMap<String, DownloadableInfo>,
}

impl StaticSource {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, info: DownloadableInfo) -> Self {
        self.insert(info);
        self
    }

    pub fn insert(&mut self, info: DownloadableInfo) {
        self.versions.insert(info.version.clone(), info);
    }
}

#[async_trait]
impl ManifestSource for StaticSource {
    async fn load(&self, version: &str) -> Result<DownloadableInfo> {
        self.versions
            .get(version)
            .cloned()
            .ok_or_else(|| ManifestError::UnknownVersion {
                version: version.to_owned(),
            })
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
