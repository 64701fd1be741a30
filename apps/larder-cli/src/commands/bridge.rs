use anyhow::Result;
use clap::Args;
use larder_store::Factory;
use larder_worker::{Command, Event};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::StoreArgs;

#[derive(Args)]
pub struct BridgeArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}

/// Relay JSON commands from stdin to a worker and its envelopes to stdout.
///
/// After stdin closes, keeps relaying until every posted request has had its
/// final message.
pub async fn run(args: BridgeArgs) -> Result<()> {
    let settings = args.store.settings()?;
    let factory = Factory::new(&settings.data_dir);
    let mut worker = larder_worker::spawn(settings, factory);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut pending: usize = 0;

    while stdin_open || pending > 0 {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str::<Value>(&line) {
                    Ok(message) => {
                        if matches!(
                            Command::from_message(&message),
                            Some(Command::CalculateStats | Command::Cleanup)
                        ) {
                            pending += 1;
                        }
                        worker.post_message(&message);
                    }
                    Err(err) => warn!(target: "larder::worker", error = %err, "ignoring malformed input line"),
                },
                None => stdin_open = false,
            },
            envelope = worker.next_envelope() => {
                let Some(envelope) = envelope else { break };
                println!("{}", serde_json::to_string(&envelope)?);
                if envelope.decode::<Event>().is_ok_and(|e| e.is_final()) {
                    pending = pending.saturating_sub(1);
                }
            }
        }
    }
    worker.shutdown().await;
    Ok(())
}
