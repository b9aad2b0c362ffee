use anyhow::{Context, Result, bail};
use clap::Subcommand;
use gantry_store::{ContentStore, Error as StoreError};
use gantry_verify::ContentHash;

use crate::env::GantryEnv;

#[derive(Clone, Debug, Subcommand)]
pub enum StoreCommands {
    /// Print the path and size of a blob, failing if it is absent.
    Has { hash: ContentHash },
    /// Re-hash a blob; a corrupt blob is removed.
    Verify { hash: ContentHash },
}

impl StoreCommands {
    pub async fn run(self, env: &GantryEnv) -> Result<()> {
        let config = env.load_config()?;
        let store = ContentStore::open(&config.cache_dir).context("Failed to open the content store")?;

        match self {
            Self::Has { hash } => match store.blob(&hash) {
                Ok(blob) => {
                    println!("{}\t{}", blob.storage_path.display(), blob.size_bytes);
                    Ok(())
                }
                Err(StoreError::NotFound(_)) => bail!("{hash} is not in the store"),
                Err(e) => Err(e).with_context(|| format!("Failed to look up {hash}")),
            },
            Self::Verify { hash } => match store.verify(&hash).await {
                Ok(true) => {
                    println!("{hash}: ok");
                    Ok(())
                }
                Ok(false) => bail!("{hash} was corrupt and has been removed"),
                Err(e) => Err(e).with_context(|| format!("Failed to verify {hash}")),
            },
        }
    }
}
