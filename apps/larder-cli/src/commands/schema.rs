use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

#[derive(Args)]
pub struct SchemaArgs {
    /// Write the schema here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run(args: SchemaArgs) -> Result<()> {
    match args.out {
        Some(path) => {
            larder_worker::write_schema_file(&path.to_string_lossy())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => {
            let schema = larder_worker::config_schema_json();
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }
    Ok(())
}
