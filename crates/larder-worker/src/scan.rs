//! The inventory valuation pass: one read transaction over the batches
//! partition, run on the blocking pool under a deadline and a cancellation
//! token.

use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;

use larder_protocol::{ProgressPayload, StatsPayload};
use larder_store::{Database, StoreError, Transaction, TransactionMode};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregate::Tally;
use crate::config::WorkerSettings;
use crate::schema::BATCHES_STORE;
use crate::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    AcquiringConnection,
    Scanning,
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Idle => "IDLE",
            ScanPhase::AcquiringConnection => "ACQUIRING_CONNECTION",
            ScanPhase::Scanning => "SCANNING",
            ScanPhase::Completed => "COMPLETED",
            ScanPhase::TimedOut => "TIMED_OUT",
            ScanPhase::Cancelled => "CANCELLED",
            ScanPhase::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanPhase::Completed | ScanPhase::TimedOut | ScanPhase::Cancelled | ScanPhase::Failed
        )
    }

    /// Terminal phase for a failed request.
    pub fn for_error(err: &WorkerError) -> Self {
        match err {
            WorkerError::Timeout(_) => ScanPhase::TimedOut,
            WorkerError::Cancelled => ScanPhase::Cancelled,
            _ => ScanPhase::Failed,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request phase bookkeeping; transitions are logged at debug level.
#[derive(Debug)]
pub struct PhaseTracker {
    request: u64,
    phase: ScanPhase,
}

impl PhaseTracker {
    pub fn new(request: u64) -> Self {
        Self {
            request,
            phase: ScanPhase::Idle,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn advance(&mut self, next: ScanPhase) {
        debug!(
            target: "larder::scan",
            request = self.request,
            from = %self.phase,
            to = %next,
            "scan phase"
        );
        self.phase = next;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub chunk_size: u64,
    pub timeout: Duration,
}

impl From<&WorkerSettings> for ScanOptions {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size.max(1),
            timeout: settings.timeout,
        }
    }
}

/// Value the batches partition of `db`.
///
/// `on_progress` is called on the caller's task, in increasing `processed`
/// order, and never after this future resolves. A missing partition yields
/// an empty result. When the deadline passes or `cancel` fires, the read
/// transaction is aborted and the scan thread is left to unwind on its own.
pub async fn run_scan<F>(
    db: &Database,
    options: &ScanOptions,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<StatsPayload, WorkerError>
where
    F: FnMut(ProgressPayload),
{
    if !db.contains_object_store(BATCHES_STORE) {
        debug!(
            target: "larder::scan",
            db = %db.name(),
            "batches partition missing; reporting empty inventory"
        );
        return Ok(StatsPayload {
            inventory_value: 0.0,
            total_processed: 0,
        });
    }

    let deadline_at = Instant::now() + options.timeout;
    let handle = db.clone();
    let tx = tokio::task::spawn_blocking(move || handle.transaction(TransactionMode::ReadOnly))
        .await
        .map_err(|e| WorkerError::Join(e.to_string()))??;
    if Instant::now() >= deadline_at {
        // Budget already spent opening the transaction.
        return Err(WorkerError::Timeout(options.timeout));
    }
    let abort = tx.abort_handle();

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let chunk_size = options.chunk_size.max(1);
    let deadline = tokio::time::sleep_until(deadline_at);
    tokio::pin!(deadline);
    let mut task = tokio::task::spawn_blocking(move || aggregate(&tx, chunk_size, &progress_tx));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort.abort();
                return Err(WorkerError::Cancelled);
            }
            _ = &mut deadline => {
                abort.abort();
                return Err(WorkerError::Timeout(options.timeout));
            }
            joined = &mut task => {
                while let Ok(progress) = progress_rx.try_recv() {
                    on_progress(progress);
                }
                let tally = joined.map_err(|e| WorkerError::Join(e.to_string()))??;
                if tally.malformed > 0 {
                    warn!(
                        target: "larder::scan",
                        db = %db.name(),
                        malformed = tally.malformed,
                        processed = tally.processed,
                        "batch records with unexpected field types were valued at zero"
                    );
                }
                return Ok(StatsPayload {
                    inventory_value: tally.current_value(),
                    total_processed: tally.processed,
                });
            }
            Some(progress) = progress_rx.recv() => on_progress(progress),
        }
    }
}

fn aggregate(
    tx: &Transaction,
    chunk_size: u64,
    progress: &mpsc::UnboundedSender<ProgressPayload>,
) -> Result<Tally, StoreError> {
    let mut tally = Tally::default();
    tx.scan(BATCHES_STORE, |record| {
        tally.record(&record.value);
        if tally.processed % chunk_size == 0 {
            let update = ProgressPayload {
                processed: tally.processed,
                current_value: tally.current_value(),
            };
            if progress.send(update).is_err() {
                // Nobody is listening any more.
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    })?;
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_store::Factory;
    use serde_json::json;

    fn seeded(dir: &std::path::Path, records: &[serde_json::Value]) -> Database {
        let factory = Factory::new(dir);
        let db = factory
            .open("larder", 1, Some(crate::schema::upgrade))
            .unwrap();
        db.write(|tx| {
            for (i, record) in records.iter().enumerate() {
                tx.put(BATCHES_STORE, &format!("batch-{i:05}"), record)?;
            }
            Ok(())
        })
        .unwrap();
        db
    }

    fn options(chunk_size: u64) -> ScanOptions {
        ScanOptions {
            chunk_size,
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn values_the_reference_batches() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(
            dir.path(),
            &[
                json!({"cost": 10, "stock": 5, "isActive": true}),
                json!({"cost": 20, "stock": 0, "isActive": true}),
                json!({"cost": 5, "stock": 100, "isActive": false}),
            ],
        );
        let stats = run_scan(&db, &options(1000), &CancellationToken::new(), |_| {
            panic!("no progress expected for three records")
        })
        .await
        .unwrap();
        assert_eq!(stats.inventory_value, 50.0);
        assert_eq!(stats.total_processed, 3);
    }

    #[tokio::test]
    async fn progress_arrives_every_chunk_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<_> = (0..25)
            .map(|_| json!({"cost": 2.5, "stock": 2, "isActive": true}))
            .collect();
        let db = seeded(dir.path(), &records);
        let mut seen = Vec::new();
        let stats = run_scan(&db, &options(10), &CancellationToken::new(), |p| {
            seen.push((p.processed, p.current_value))
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![(10, 50.0), (20, 100.0)]);
        assert_eq!(stats.total_processed, 25);
        assert_eq!(stats.inventory_value, 125.0);
    }

    #[tokio::test]
    async fn zero_budget_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(dir.path(), &[json!({"cost": 1, "stock": 1, "isActive": true})]);
        let opts = ScanOptions {
            chunk_size: 1,
            timeout: Duration::ZERO,
        };
        let mut progress = 0;
        let err = run_scan(&db, &opts, &CancellationToken::new(), |_| progress += 1)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(_)));
        assert_eq!(progress, 0);
    }

    #[tokio::test]
    async fn cancelled_token_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(dir.path(), &[json!({"cost": 1, "stock": 1, "isActive": true})]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_scan(&db, &options(1000), &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
    }

    #[tokio::test]
    async fn closed_database_reports_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(dir.path(), &[]);
        db.close();
        let err = run_scan(&db, &options(1000), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.code().as_str(), "InvalidStateError");
    }

    #[test]
    fn phases_know_their_terminal_states() {
        let mut tracker = PhaseTracker::new(7);
        assert_eq!(tracker.phase(), ScanPhase::Idle);
        tracker.advance(ScanPhase::AcquiringConnection);
        tracker.advance(ScanPhase::Scanning);
        assert!(!tracker.phase().is_terminal());
        tracker.advance(ScanPhase::for_error(&WorkerError::Timeout(Duration::ZERO)));
        assert_eq!(tracker.phase(), ScanPhase::TimedOut);
        assert!(tracker.phase().is_terminal());
        assert_eq!(ScanPhase::AcquiringConnection.to_string(), "ACQUIRING_CONNECTION");
    }
}
