use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::sql;
use crate::transaction::{Transaction, TransactionMode};
use crate::StoreError;

/// Raised on every open handle when another opener upgrades the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old_version: u32,
    pub new_version: u32,
}

/// Callback receiving the affected handle, so it can close it without
/// holding a strong reference of its own.
pub type VersionChangeListener = Arc<dyn Fn(&Database, &VersionChange) + Send + Sync>;

/// A live connection to a named, versioned database.
///
/// Handles are cheap to clone; all clones share the same open/closed state.
/// Each transaction runs on its own SQLite connection, so closing a handle
/// never interrupts a transaction that is already running.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    id: Uuid,
    name: String,
    version: u32,
    path: PathBuf,
    busy_timeout: Duration,
    store_names: Vec<String>,
    closed: AtomicBool,
    listeners: Mutex<Vec<VersionChangeListener>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Database {
    pub(crate) fn new(
        name: &str,
        version: u32,
        path: PathBuf,
        busy_timeout: Duration,
        store_names: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                id: Uuid::new_v4(),
                name: name.to_string(),
                version,
                path,
                busy_timeout,
                store_names,
                closed: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<DatabaseInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<DatabaseInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> u32 {
        self.inner.version
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Object store names as they were when this handle was opened.
    pub fn object_store_names(&self) -> &[String] {
        &self.inner.store_names
    }

    pub fn contains_object_store(&self, store: &str) -> bool {
        self.inner.store_names.iter().any(|s| s == store)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the handle. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(
                target: "larder::store",
                db = %self.inner.name,
                id = %self.inner.id,
                "connection closed"
            );
        }
    }

    pub fn on_version_change<F>(&self, listener: F)
    where
        F: Fn(&Database, &VersionChange) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(listener));
    }

    pub(crate) fn add_listener(&self, listener: VersionChangeListener) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub(crate) fn dispatch_version_change(&self, change: &VersionChange) {
        let listeners: Vec<VersionChangeListener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        debug!(
            target: "larder::store",
            db = %self.inner.name,
            id = %self.inner.id,
            old = change.old_version,
            new = change.new_version,
            listeners = listeners.len(),
            "version change requested elsewhere"
        );
        for listener in listeners {
            listener(self, change);
        }
    }

    pub fn transaction(&self, mode: TransactionMode) -> Result<Transaction, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let conn = sql::connect(&self.inner.path, self.inner.busy_timeout)?;
        Transaction::begin(conn, mode, &self.inner.name)
    }

    /// Convenience for a read-write transaction committed after `f` succeeds.
    pub fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction) -> Result<T, StoreError>,
    {
        let tx = self.transaction(TransactionMode::ReadWrite)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
