use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{BridgeArgs, ImportArgs, SchemaArgs, StatsArgs};

#[derive(Parser)]
#[command(name = "larder", version, about = "Inventory valuation worker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Value the current inventory once
    Stats(StatsArgs),
    /// Load batch records from CSV or JSON
    Import(ImportArgs),
    /// Speak the worker protocol over stdin/stdout
    Bridge(BridgeArgs),
    /// Print or write the configuration JSON schema
    ConfigSchema(SchemaArgs),
}

#[tokio::main]
async fn main() {
    larder_otel::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Stats(args) => commands::stats::run(args).await,
        Commands::Import(args) => commands::import::run(args),
        Commands::Bridge(args) => commands::bridge::run(args).await,
        Commands::ConfigSchema(args) => commands::schema::run(args),
    }
}
