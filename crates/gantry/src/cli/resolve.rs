use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use gantry_manifest::{DirectorySource, FetchPlan, VersionHandle};
use gantry_store::ContentStore;
use tabled::Tabled;

use crate::env::GantryEnv;
use crate::ui::table::Formatter;

#[derive(Clone, Debug, clap::Args)]
pub struct ResolveArg {
    #[arg(value_name = "VERSION")]
    version_id: String,
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "STATUS")]
    status: &'static str,
    #[tabled(rename = "HASH")]
    hash:   String,
    #[tabled(rename = "SOURCE")]
    source: String,
}

impl ResolveArg {
    pub async fn run(self, env: &GantryEnv) -> Result<()> {
        let config = env.load_config()?;
        let store = ContentStore::open(&config.cache_dir).context("Failed to open the content store")?;

        let handle = VersionHandle::new(&self.version_id, Arc::new(DirectorySource::new(env.manifests())));
        let info = handle
            .resolve()
            .await
            .with_context(|| format!("Failed to load the manifest of {}", self.version_id))?;
        let resolution = config
            .resolver()
            .resolve(&info.manifest, &store)
            .with_context(|| format!("Failed to resolve {}", self.version_id))?;

        let fetch: HashMap<&str, &FetchPlan> = resolution
            .to_fetch
            .iter()
            .map(|plan| (plan.entry.target_name.as_str(), plan))
            .collect();

        let rows = info.manifest.iter().map(|entry| {
            let hash = entry.hash().map(|h| h.to_hex()).unwrap_or_default();
            match fetch.get(entry.target_name.as_str()) {
                Some(plan) => EntryRow {
                    target: entry.target_name.clone(),
                    status: "fetch",
                    hash,
                    source: plan.url.to_string(),
                },
                None => EntryRow {
                    target: entry.target_name.clone(),
                    status: "cached",
                    source: entry
                        .hash()
                        .map(|h| store.blob_path(h).display().to_string())
                        .unwrap_or_default(),
                    hash,
                },
            }
        });

        let table = Formatter::default()
            .with_header(format!("{} -> {}", info.version, info.folder_name))
            .with_footer(format!(
                "{} cached, {} to fetch",
                resolution.cached.len(),
                resolution.to_fetch.len()
            ))
            .build(rows);
        println!("{table}");
        Ok(())
    }
}
