use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Result;
use crate::source::{DownloadableInfo, ManifestSource};

/// A version id whose manifest has not necessarily been loaded yet.
///
/// [`resolve`](Self::resolve) loads and validates it once; later calls, and
/// calls racing the first, share the same result. A failed load is not
/// cached, so it can be retried.
#[derive(Clone)]
pub struct VersionHandle {
    version:  String,
    source:   Arc<dyn ManifestSource>,
    resolved: Arc<OnceCell<DownloadableInfo>>,
}

impl VersionHandle {
    pub fn new(version: impl Into<String>, source: Arc<dyn ManifestSource>) -> Self {
        Self {
            version: version.into(),
            source,
            resolved: Arc::new(OnceCell::new()),
        }
    }

    pub fn version(&self) -> &str { &self.version }

    pub fn is_resolved(&self) -> bool { self.resolved.initialized() }

    pub async fn resolve(&self) -> Result<&DownloadableInfo> {
        self.resolved
            .get_or_try_init(|| async {
                debug!(version = %self.version, "loading manifest");
                let info = self.source.load(&self.version).await?;
                info.validate()?;
                Ok(info)
            })
            .await
    }
}

impl fmt::Debug for VersionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionHandle")
            .field("version", &self.version)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}
