mod common;

use std::time::Duration;

use common::{active_batch, factory, seed, seed_repeated, until_final};
use larder_worker::schema::DB_NAME;
use larder_worker::{
    spawn, Command, ErrorCode, Event, OverlapPolicy, ProgressPayload, StatsPayload,
    WorkerSettings,
};
use serde_json::json;

fn reference_batches() -> Vec<serde_json::Value> {
    vec![
        json!({"cost": 10, "stock": 5, "isActive": true}),
        json!({"cost": 20, "stock": 0, "isActive": true}),
        json!({"cost": 5, "stock": 100, "isActive": false}),
    ]
}

fn stats(inventory_value: f64, total_processed: u64) -> Event {
    Event::StatsResult(StatsPayload {
        inventory_value,
        total_processed,
    })
}

fn error_code(event: &Event) -> ErrorCode {
    match event {
        Event::Error(err) => err.code.clone(),
        other => panic!("expected ERROR, got {other:?}"),
    }
}

#[tokio::test]
async fn values_active_stock_only() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(&factory, &reference_batches());
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    assert!(worker.post(Command::CalculateStats));
    let (progress, last) = until_final(&mut worker).await;
    assert!(progress.is_empty());
    assert_eq!(last, stats(50.0, 3));
    worker.shutdown().await;
}

#[tokio::test]
async fn empty_partition_reports_zero() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(&factory, &[]);
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    worker.post(Command::CalculateStats);
    let (progress, last) = until_final(&mut worker).await;
    assert!(progress.is_empty());
    assert_eq!(last, stats(0.0, 0));
    worker.shutdown().await;
}

#[tokio::test]
async fn missing_partition_reports_zero() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    // Version 1 without any object stores.
    factory.open(DB_NAME, 1, None).unwrap().close();
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    worker.post(Command::CalculateStats);
    let (_, last) = until_final(&mut worker).await;
    assert_eq!(last, stats(0.0, 0));
    worker.shutdown().await;
}

#[tokio::test]
async fn progress_every_thousand_records() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    let records: Vec<_> = (0..2500).map(|_| active_batch(1.0, 2.0)).collect();
    seed(&factory, &records);
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    worker.post(Command::CalculateStats);
    let (progress, last) = until_final(&mut worker).await;
    assert_eq!(
        progress,
        vec![
            Event::Progress(ProgressPayload {
                processed: 1000,
                current_value: 2000.0,
            }),
            Event::Progress(ProgressPayload {
                processed: 2000,
                current_value: 4000.0,
            }),
        ]
    );
    assert_eq!(last, stats(5000.0, 2500));
    worker.shutdown().await;
}

#[tokio::test]
async fn repeated_requests_agree_and_reuse_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(&factory, &reference_batches());
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    worker.post(Command::CalculateStats);
    let (_, first) = until_final(&mut worker).await;
    let id = worker.connections().current().unwrap().id();

    worker.post(Command::CalculateStats);
    let (_, second) = until_final(&mut worker).await;
    assert_eq!(first, second);
    assert_eq!(worker.connections().current().unwrap().id(), id);
    worker.shutdown().await;
}

#[tokio::test]
async fn zero_budget_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(&factory, &reference_batches());
    let settings = WorkerSettings::new(dir.path()).with_timeout(Duration::ZERO);
    let mut worker = spawn(settings, factory);

    worker.post(Command::CalculateStats);
    let (progress, last) = until_final(&mut worker).await;
    assert!(progress.is_empty());
    assert_eq!(error_code(&last), ErrorCode::CalculationTimeout);
    assert_eq!(error_code(&last).as_str(), "CALCULATION_TIMEOUT");
    worker.shutdown().await;
}

#[tokio::test]
async fn budget_running_out_mid_scan_ends_with_one_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed_repeated(&factory, 300_000, &active_batch(1.5, 2.0));
    let settings = WorkerSettings::new(dir.path()).with_timeout(Duration::from_millis(30));
    let mut worker = spawn(settings, factory);

    worker.post(Command::CalculateStats);
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(750), worker.next_event()).await
    {
        events.push(event);
    }

    let finals: Vec<&Event> = events.iter().filter(|e| e.is_final()).collect();
    assert_eq!(finals.len(), 1, "events: {events:?}");
    assert_eq!(error_code(finals[0]), ErrorCode::CalculationTimeout);
    assert!(events.last().is_some_and(Event::is_final));

    let processed: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress(p) => Some(p.processed),
            _ => None,
        })
        .collect();
    assert!(processed.windows(2).all(|w| w[1] == w[0] + 1000));
    assert!(processed.last().map_or(true, |&n| n < 300_000));
    worker.shutdown().await;
}

#[tokio::test]
async fn cancel_ends_an_inflight_calculation() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(&factory, &reference_batches());
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    // Both land before the worker task first runs, so the cancel is seen
    // before the calculation starts scanning.
    worker.post(Command::CalculateStats);
    worker.post(Command::Cancel);
    let (_, last) = until_final(&mut worker).await;
    assert_eq!(error_code(&last), ErrorCode::CalculationCancelled);

    // Later requests are unaffected.
    worker.post(Command::CalculateStats);
    let (_, last) = until_final(&mut worker).await;
    assert_eq!(last, stats(50.0, 3));
    worker.shutdown().await;
}

#[tokio::test]
async fn reject_policy_refuses_overlapping_requests() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(&factory, &reference_batches());
    let settings = WorkerSettings::new(dir.path()).with_overlap(OverlapPolicy::Reject);
    let mut worker = spawn(settings, factory);

    worker.post(Command::CalculateStats);
    worker.post(Command::CalculateStats);
    let (_, first) = until_final(&mut worker).await;
    assert_eq!(error_code(&first), ErrorCode::ScanInProgress);
    let (_, second) = until_final(&mut worker).await;
    assert_eq!(second, stats(50.0, 3));
    worker.shutdown().await;
}

#[tokio::test]
async fn allow_policy_answers_every_request() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(&factory, &reference_batches());
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    worker.post(Command::CalculateStats);
    worker.post(Command::CalculateStats);
    let (_, a) = until_final(&mut worker).await;
    let (_, b) = until_final(&mut worker).await;
    assert_eq!(a, stats(50.0, 3));
    assert_eq!(b, stats(50.0, 3));
    worker.shutdown().await;
}

#[tokio::test]
async fn cleanup_without_connection_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory(dir.path()));

    worker.post(Command::Cleanup);
    assert_eq!(worker.next_event().await, Some(Event::CleanupComplete));
    assert!(worker.connections().current().is_none());
    worker.shutdown().await;
}

#[tokio::test]
async fn unknown_commands_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory(dir.path()));

    assert!(worker.post_message(&json!({"type": "REFRESH_EVERYTHING"})));
    assert!(worker.post_message(&json!({"payload": 1})));
    worker.post_message(&json!({"type": "CLEANUP"}));
    assert_eq!(worker.next_event().await, Some(Event::CleanupComplete));
    worker.shutdown().await;
}

#[tokio::test]
async fn malformed_records_are_counted_at_zero_value() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(
        &factory,
        &[
            json!({"cost": "ten", "stock": 5, "isActive": true}),
            json!({"cost": 4, "stock": 2.5, "isActive": true}),
            json!("not an object"),
        ],
    );
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    worker.post(Command::CalculateStats);
    let (_, last) = until_final(&mut worker).await;
    assert_eq!(last, stats(10.0, 3));
    worker.shutdown().await;
}

#[tokio::test]
async fn events_travel_as_tagged_envelopes() {
    let dir = tempfile::tempdir().unwrap();
    let factory = factory(dir.path());
    seed(&factory, &reference_batches());
    let mut worker = spawn(WorkerSettings::new(dir.path()), factory);

    worker.post(Command::CalculateStats);
    let envelope = worker.next_envelope().await.unwrap();
    assert_eq!(envelope.kind, "STATS_RESULT");
    assert_eq!(
        envelope.payload,
        json!({
            "type": "STATS_RESULT",
            "success": true,
            "payload": {"inventoryValue": 50.0, "totalProcessed": 3}
        })
    );
    worker.shutdown().await;
}
