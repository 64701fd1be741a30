use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use larder_events::{Envelope, Inbox, Outbox};
use larder_protocol::{Command, Event, StatsPayload};
use larder_store::Factory;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{OverlapPolicy, WorkerSettings};
use crate::connection::ConnectionManager;
use crate::scan::{run_scan, PhaseTracker, ScanOptions, ScanPhase};
use crate::WorkerError;

/// Controller-side handle of a running worker.
///
/// Commands go in through `post`/`post_message`; progress, results and
/// errors come back through `next_event` in the order the worker sent them.
pub struct WorkerHandle {
    commands: Outbox,
    events: Inbox,
    connections: ConnectionManager,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn post(&self, command: Command) -> bool {
        self.commands.post(command.kind(), &command)
    }

    /// Post an untyped message, as a page would over a structured channel.
    pub fn post_message(&self, message: &Value) -> bool {
        let kind = Command::kind_of(message).unwrap_or("UNTYPED");
        self.commands.post(kind, message)
    }

    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        self.events.recv().await
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            let envelope = self.events.recv().await?;
            match envelope.decode::<Event>() {
                Ok(event) => return Some(event),
                Err(err) => warn!(
                    target: "larder::worker",
                    kind = %envelope.kind,
                    error = %err,
                    "undecodable worker event"
                ),
            }
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Cancel in-flight scans, close the connection and wait for the worker
    /// task to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

/// Start a worker on the current tokio runtime.
pub fn spawn(settings: WorkerSettings, factory: Factory) -> WorkerHandle {
    let (commands, command_inbox) = larder_events::channel();
    let (events, event_inbox) = larder_events::channel();
    let connections = ConnectionManager::new(factory, &settings.db_name, settings.db_version);
    let shutdown = CancellationToken::new();
    let worker = Worker {
        scans: shutdown.child_token(),
        settings,
        connections: connections.clone(),
        events,
        inflight: Arc::new(AtomicUsize::new(0)),
        shutdown: shutdown.clone(),
        next_request: 0,
        tasks: JoinSet::new(),
    };
    let task = tokio::spawn(worker.run(command_inbox));
    WorkerHandle {
        commands,
        events: event_inbox,
        connections,
        shutdown,
        task,
    }
}

struct Worker {
    settings: WorkerSettings,
    connections: ConnectionManager,
    events: Outbox,
    inflight: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    /// Parent of every running scan's token; replaced after each CANCEL.
    scans: CancellationToken,
    next_request: u64,
    tasks: JoinSet<()>,
}

fn emit(events: &Outbox, event: &Event) {
    events.post(event.kind(), event);
}

impl Worker {
    async fn run(mut self, mut commands: Inbox) {
        info!(
            target: "larder::worker",
            db = %self.settings.db_name,
            version = self.settings.db_version,
            dir = %self.settings.data_dir.display(),
            "worker started"
        );
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(_) = self.tasks.join_next(), if !self.tasks.is_empty() => {}
                message = commands.recv() => match message {
                    Some(envelope) => self.dispatch(envelope),
                    None => break,
                },
            }
        }
        self.scans.cancel();
        while self.tasks.join_next().await.is_some() {}
        self.connections.release();
        info!(target: "larder::worker", "worker stopped");
    }

    fn dispatch(&mut self, envelope: Envelope) {
        match Command::from_message(&envelope.payload) {
            Some(Command::CalculateStats) => self.start_calculation(),
            Some(Command::Cleanup) => {
                let closed = self.connections.release();
                debug!(target: "larder::worker", closed, "cleanup");
                emit(&self.events, &Event::CleanupComplete);
            }
            Some(Command::Cancel) => {
                let inflight = self.inflight.load(Ordering::SeqCst);
                self.scans.cancel();
                self.scans = self.shutdown.child_token();
                info!(target: "larder::worker", inflight, "cancel requested");
            }
            None => warn!(
                target: "larder::worker",
                kind = Command::kind_of(&envelope.payload).unwrap_or("<untyped>"),
                "ignoring unknown worker command"
            ),
        }
    }

    fn start_calculation(&mut self) {
        self.next_request += 1;
        let request = self.next_request;
        let Some(guard) = InflightGuard::enter(&self.inflight, self.settings.overlap) else {
            let err = WorkerError::InProgress;
            warn!(target: "larder::scan", request, code = %err.code(), "calculation rejected");
            emit(&self.events, &err.to_event());
            return;
        };
        let connections = self.connections.clone();
        let events = self.events.clone();
        let cancel = self.scans.child_token();
        let options = ScanOptions::from(&self.settings);
        self.tasks.spawn(async move {
            let _guard = guard;
            calculate(request, connections, options, cancel, events).await;
        });
    }
}

async fn calculate(
    request: u64,
    connections: ConnectionManager,
    options: ScanOptions,
    cancel: CancellationToken,
    events: Outbox,
) {
    let started = Instant::now();
    let mut phase = PhaseTracker::new(request);
    let outcome = execute(&connections, &options, &cancel, &events, &mut phase).await;

    match outcome {
        Ok(stats) => {
            phase.advance(ScanPhase::Completed);
            info!(
                target: "larder::scan",
                request,
                inventory_value = stats.inventory_value,
                total_processed = stats.total_processed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "inventory calculated"
            );
            emit(&events, &Event::StatsResult(stats));
        }
        Err(err) => {
            phase.advance(ScanPhase::for_error(&err));
            warn!(
                target: "larder::scan",
                request,
                code = %err.code(),
                error = %err,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "inventory calculation failed"
            );
            emit(&events, &err.to_event());
        }
    }
}

async fn execute(
    connections: &ConnectionManager,
    options: &ScanOptions,
    cancel: &CancellationToken,
    events: &Outbox,
    phase: &mut PhaseTracker,
) -> Result<StatsPayload, WorkerError> {
    phase.advance(ScanPhase::AcquiringConnection);
    let db = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
        db = connections.acquire() => db?,
    };
    phase.advance(ScanPhase::Scanning);
    run_scan(&db, options, cancel, |progress| {
        emit(events, &Event::Progress(progress));
    })
    .await
}

/// Counts running calculations; under `Reject` admits only one at a time.
struct InflightGuard {
    counter: Arc<AtomicUsize>,
}

impl InflightGuard {
    fn enter(counter: &Arc<AtomicUsize>, policy: OverlapPolicy) -> Option<Self> {
        match policy {
            OverlapPolicy::Allow => {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            OverlapPolicy::Reject => {
                counter
                    .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                    .ok()?;
            }
        }
        Some(Self {
            counter: counter.clone(),
        })
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_policy_admits_one_at_a_time() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = InflightGuard::enter(&counter, OverlapPolicy::Reject).unwrap();
        assert!(InflightGuard::enter(&counter, OverlapPolicy::Reject).is_none());
        drop(first);
        assert!(InflightGuard::enter(&counter, OverlapPolicy::Reject).is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn allow_policy_counts_overlaps() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = InflightGuard::enter(&counter, OverlapPolicy::Allow).unwrap();
        let b = InflightGuard::enter(&counter, OverlapPolicy::Allow).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        drop((a, b));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
