use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gantry_install::InstallConfig;
use home::home_dir;
use tracing::debug;

/// Where gantry keeps its state.
///
/// The root is `$GANTRY_ROOT`, else `~/.gantry`. It holds `config.toml`,
/// `manifests/<version>.json` and the defaults for every directory in
/// [`InstallConfig`].
#[derive(Debug, Clone)]
pub struct GantryEnv {
    root:      PathBuf,
    config:    PathBuf,
    manifests: PathBuf,
}

impl GantryEnv {
    pub fn new(config: Option<PathBuf>, manifests: Option<PathBuf>) -> Result<Self> {
        let root = match env::var_os("GANTRY_ROOT") {
            Some(root) => PathBuf::from(root),
            None => home_dir().context("Failed to get home directory")?.join(".gantry"),
        };

        Ok(Self {
            config: config.unwrap_or_else(|| root.join("config.toml")),
            manifests: manifests.unwrap_or_else(|| root.join("manifests")),
            root,
        })
    }

    pub fn manifests(&self) -> &Path { &self.manifests }

    /// Defaults rooted at the gantry root, overridden by whatever the config
    /// file sets. A missing file means all defaults.
    pub fn load_config(&self) -> Result<InstallConfig> {
        let defaults = InstallConfig::rooted_at(&self.root);
        if !self.config.exists() {
            debug!(path = %self.config.display(), "no config file, using defaults");
            return Ok(defaults);
        }

        let text = std::fs::read_to_string(&self.config)
            .with_context(|| format!("Failed to read {}", self.config.display()))?;
        let overrides: toml::Table =
            toml::from_str(&text).with_context(|| format!("Failed to parse {}", self.config.display()))?;

        let mut merged = toml::Table::try_from(defaults).context("Failed to encode default config")?;
        merged.extend(overrides);
        merged
            .try_into()
            .with_context(|| format!("Invalid config in {}", self.config.display()))
    }
}
