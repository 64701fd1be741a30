#![allow(dead_code)]

use std::path::Path;

use larder_store::{Database, Factory};
use larder_worker::schema::{self, BATCHES_STORE, DB_NAME, DB_VERSION};
use larder_worker::{Event, WorkerHandle};
use serde_json::{json, Value};

/// Create the inventory database and write `records` as batches.
/// The returned handle is closed so it never blocks the worker.
pub fn seed(factory: &Factory, records: &[Value]) {
    let db = factory
        .open(DB_NAME, DB_VERSION, Some(schema::upgrade))
        .unwrap();
    put_batches(&db, records);
    db.close();
}

/// Like `seed`, for `count` copies of one record.
pub fn seed_repeated(factory: &Factory, count: usize, record: &Value) {
    let db = factory
        .open(DB_NAME, DB_VERSION, Some(schema::upgrade))
        .unwrap();
    db.write(|tx| {
        for i in 0..count {
            tx.put(BATCHES_STORE, &format!("batch-{i:07}"), record)?;
        }
        Ok(())
    })
    .unwrap();
    db.close();
}

pub fn put_batches(db: &Database, records: &[Value]) {
    db.write(|tx| {
        for (i, record) in records.iter().enumerate() {
            tx.put(BATCHES_STORE, &format!("batch-{i:06}"), record)?;
        }
        Ok(())
    })
    .unwrap();
}

pub fn factory(dir: &Path) -> Factory {
    Factory::new(dir)
}

pub fn active_batch(cost: f64, stock: f64) -> Value {
    json!({"productId": "p-1", "cost": cost, "stock": stock, "isActive": true})
}

/// Collect events until the first final one, which is returned separately.
pub async fn until_final(worker: &mut WorkerHandle) -> (Vec<Event>, Event) {
    let mut progress = Vec::new();
    loop {
        let event = worker.next_event().await.expect("worker hung up");
        if event.is_final() {
            return (progress, event);
        }
        progress.push(event);
    }
}
