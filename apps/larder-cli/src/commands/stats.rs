use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use larder_store::Factory;
use larder_worker::{Command, Event};

use super::StoreArgs;

#[derive(Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Scan budget in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Records between progress lines
    #[arg(long)]
    pub chunk_size: Option<u64>,
}

/// Run one calculation, printing each worker message as a JSON line.
pub async fn run(args: StatsArgs) -> Result<()> {
    let mut settings = args.store.settings()?;
    if let Some(ms) = args.timeout_ms {
        settings = settings.with_timeout(Duration::from_millis(ms));
    }
    if let Some(n) = args.chunk_size {
        settings = settings.with_chunk_size(n);
    }
    let factory = Factory::new(&settings.data_dir);
    let mut worker = larder_worker::spawn(settings, factory);
    worker.post(Command::CalculateStats);

    let mut failure = None;
    while let Some(envelope) = worker.next_envelope().await {
        println!("{}", serde_json::to_string(&envelope.payload)?);
        let event: Event = envelope.decode()?;
        if let Event::Error(err) = &event {
            failure = Some(format!("{}: {}", err.code, err.message));
        }
        if event.is_final() {
            break;
        }
    }
    worker.shutdown().await;
    if let Some(message) = failure {
        bail!(message);
    }
    Ok(())
}
