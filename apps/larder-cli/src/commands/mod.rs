pub mod bridge;
pub mod import;
pub mod schema;
pub mod stats;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use larder_worker::{load_config, Config, WorkerSettings};

pub use bridge::BridgeArgs;
pub use import::ImportArgs;
pub use schema::SchemaArgs;
pub use stats::StatsArgs;

/// Where the inventory database lives.
#[derive(Args, Clone, Debug)]
pub struct StoreArgs {
    /// Directory holding the database files (overrides config and LARDER_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl StoreArgs {
    pub fn settings(&self) -> Result<WorkerSettings> {
        let cfg = match &self.config {
            Some(path) => load_config(&path.to_string_lossy())
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };
        let mut settings = WorkerSettings::from_config(&cfg);
        if let Some(dir) = &self.data_dir {
            settings.data_dir = dir.clone();
        }
        Ok(settings)
    }
}
