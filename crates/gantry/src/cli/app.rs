use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::cli::install::InstallArg;
use crate::cli::resolve::ResolveArg;
use crate::cli::store::StoreCommands;
use crate::env::GantryEnv;

#[derive(Clone, Debug, Parser)]
#[command(name = "gantry", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct App {
    /// Config file [default: <root>/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding `<version>.json` manifests [default: <root>/manifests]
    #[arg(long, global = true)]
    manifests: Option<PathBuf>,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "i", name = "install", about = "Install a version into its folder")]
    Install(InstallArg),
    #[command(alias = "r", name = "resolve", about = "Show which entries are cached and which need a download")]
    Resolve(ResolveArg),
    #[command(name = "store", about = "Inspect the content store")]
    #[command(subcommand)]
    Store(StoreCommands),
}

impl App {
    /// Filter used when `GANTRY_LOG` is unset.
    pub fn log_level(&self) -> &'static str { if self.quiet { "warn" } else { "info" } }

    pub async fn run(self) -> Result<()> {
        let env = GantryEnv::new(self.config, self.manifests)?;
        match self.cmd {
            Commands::Install(arg) => arg.run(&env).await,
            Commands::Resolve(arg) => arg.run(&env).await,
            Commands::Store(cmd) => cmd.run(&env).await,
        }
    }
}
