use std::path::{Path, PathBuf};
use std::time::Duration;

use gantry_archive::ToolCommand;
use gantry_manifest::ManifestResolver;
use serde::{Deserialize, Serialize};
use url::Url;

/// Package file format produced by assembly and read by extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageFormat {
    #[default]
    Zip,
    TarGz,
}

/// Settings shared by every install session.
///
/// Missing fields take their defaults, so a config file only lists what it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Parent of each session's private download folder.
    pub temp_dir:                 PathBuf,
    /// Root of the content-addressed store.
    pub cache_dir:                PathBuf,
    /// One subfolder per installed version lives here.
    pub install_root:             PathBuf,
    pub max_concurrent_downloads: usize,
    /// Extra attempts per piece after a network failure or hash mismatch.
    pub max_retries:              u32,
    pub retry_backoff_ms:         u64,
    pub request_timeout_secs:     u64,
    /// A download with no body data for this long fails as a network error.
    pub idle_timeout_secs:        u64,
    /// Mirror serving blobs at `<base>/<hex hash>` for hash-only entries.
    pub blob_base_url:            Option<Url>,
    pub package_name:             String,
    pub package_format:           PackageFormat,
    /// External assembler; the built-in one for `package_format` when unset.
    pub assembler:                Option<ToolCommand>,
    /// External extractor; the built-in one for `package_format` when unset.
    pub extractor:                Option<ToolCommand>,
}

impl Default for InstallConfig {
    fn default() -> Self { Self::rooted_at(".gantry") }
}

impl InstallConfig {
    /// Defaults with `tmp/`, `cache/` and `versions/` under `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            temp_dir:                 root.join("tmp"),
            cache_dir:                root.join("cache"),
            install_root:             root.join("versions"),
            max_concurrent_downloads: 4,
            max_retries:              2,
            retry_backoff_ms:         250,
            request_timeout_secs:     300,
            idle_timeout_secs:        60,
            blob_base_url:            None,
            package_name:             "package.zip".to_owned(),
            package_format:           PackageFormat::Zip,
            assembler:                None,
            extractor:                None,
        }
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_blob_base_url(mut self, url: Url) -> Self {
        self.blob_base_url = Some(url);
        self
    }

    pub fn with_package(mut self, name: impl Into<String>, format: PackageFormat) -> Self {
        self.package_name = name.into();
        self.package_format = format;
        self
    }

    pub fn with_assembler(mut self, tool: ToolCommand) -> Self {
        self.assembler = Some(tool);
        self
    }

    pub fn with_extractor(mut self, tool: ToolCommand) -> Self {
        self.extractor = Some(tool);
        self
    }

    /// Concurrency cap, never below one.
    pub fn download_concurrency(&self) -> usize { self.max_concurrent_downloads.max(1) }

    pub fn retry_backoff(&self) -> Duration { Duration::from_millis(self.retry_backoff_ms) }

    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }

    pub fn idle_timeout(&self) -> Duration { Duration::from_secs(self.idle_timeout_secs) }

    /// Resolver using this config's blob mirror, if any.
    pub fn resolver(&self) -> ManifestResolver {
        match &self.blob_base_url {
            Some(base) => ManifestResolver::new().with_blob_base_url(base.clone()),
            None => ManifestResolver::new(),
        }
    }
}
