use std::sync::Arc;

use anyhow::{Context, Result};
use gantry_fetch::ReqwestClient;
use gantry_install::Installer;
use gantry_manifest::{DirectorySource, VersionHandle};
use tracing::{info, warn};

use crate::env::GantryEnv;
use crate::ui::tracker::ChannelTracker;

#[derive(Clone, Debug, clap::Args)]
pub struct InstallArg {
    /// Version id, read from `<manifests>/<version>.json`.
    #[arg(value_name = "VERSION")]
    version_id: String,

    /// Parallel downloads, overriding the config.
    #[arg(short, long)]
    jobs: Option<usize>,
}

impl InstallArg {
    pub async fn run(self, env: &GantryEnv) -> Result<()> {
        let mut config = env.load_config()?;
        if let Some(jobs) = self.jobs {
            config = config.with_max_concurrent_downloads(jobs);
        }

        let client = ReqwestClient::with_timeout(config.request_timeout()).context("Failed to build HTTP client")?;
        let installer = Installer::new(config, client).context("Failed to open the content store")?;

        let handle = VersionHandle::new(&self.version_id, Arc::new(DirectorySource::new(env.manifests())));
        let info = handle
            .resolve()
            .await
            .with_context(|| format!("Failed to load the manifest of {}", self.version_id))?;

        let session = installer.session(info.clone());
        let tracker = ChannelTracker::new();
        let bars = tracker.clone();
        session.on_channel_added(move |channel| bars.track(channel));

        let token = session.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, canceling install");
                token.cancel();
            }
        });

        let result = session.run().await;
        tracker.finish();
        let outcome = result.with_context(|| format!("Failed to install {}", self.version_id))?;

        info!(
            fetched = outcome.fetched,
            reused = outcome.reused,
            bytes = outcome.bytes_downloaded,
            "installed {} into {}",
            outcome.version,
            outcome.install_path.display()
        );
        println!("{}", outcome.install_path.display());
        Ok(())
    }
}
