use std::sync::{Arc, Mutex, Weak};

use larder_store::{Database, Factory, StoreError, VersionChange, VersionChangeListener};
use tracing::{debug, info, warn};

use crate::schema;

pub type InvalidationListener = Arc<dyn Fn(&VersionChange) + Send + Sync>;

/// Owns the worker's single store connection.
///
/// The handle is opened on first `acquire`, reused while it stays open, and
/// dropped either by `release` or when another opener upgrades the database.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    factory: Factory,
    name: String,
    version: u32,
    active: Mutex<Option<Database>>,
    listeners: Mutex<Vec<InvalidationListener>>,
}

impl ConnectionManager {
    pub fn new(factory: Factory, name: impl Into<String>, version: u32) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                factory,
                name: name.into(),
                version,
                active: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The open singleton, if any.
    pub fn current(&self) -> Option<Database> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|db| !db.is_closed())
            .cloned()
    }

    pub async fn acquire(&self) -> Result<Database, StoreError> {
        if let Some(db) = self.current() {
            return Ok(db);
        }
        let inner = &self.inner;
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let on_change: VersionChangeListener =
            Arc::new(move |db: &Database, change: &VersionChange| {
                db.close();
                if let Some(inner) = weak.upgrade() {
                    inner.invalidate(db, change);
                }
            });
        let db = inner
            .factory
            .open_observed_async(&inner.name, inner.version, Some(schema::upgrade), on_change)
            .await?;

        let mut slot = inner.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = slot.as_ref().filter(|d| !d.is_closed()).cloned() {
            // Lost a race with a concurrent acquire; keep the first handle.
            drop(slot);
            db.close();
            return Ok(existing);
        }
        *slot = Some(db.clone());
        info!(
            target: "larder::worker",
            db = %inner.name,
            version = inner.version,
            id = %db.id(),
            stores = ?db.object_store_names(),
            "store connection opened"
        );
        Ok(db)
    }

    /// Close and forget the singleton. Returns whether one was open.
    pub fn release(&self) -> bool {
        let taken = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match taken {
            Some(db) => {
                let was_open = !db.is_closed();
                db.close();
                debug!(target: "larder::worker", id = %db.id(), "store connection released");
                was_open
            }
            None => false,
        }
    }

    pub fn on_invalidated<F>(&self, listener: F)
    where
        F: Fn(&VersionChange) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }
}

impl ManagerInner {
    fn invalidate(&self, db: &Database, change: &VersionChange) {
        {
            let mut slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|d| d.id() == db.id()) {
                *slot = None;
            }
        }
        warn!(
            target: "larder::worker",
            db = %self.name,
            id = %db.id(),
            old = change.old_version,
            new = change.new_version,
            "store upgraded elsewhere; connection dropped"
        );
        let listeners: Vec<InvalidationListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener(change);
        }
    }
}
