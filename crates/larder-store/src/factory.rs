use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rusqlite::TransactionBehavior;
use tracing::{info, warn};

use crate::database::{Database, DatabaseInner, VersionChange, VersionChangeListener};
use crate::error::is_busy;
use crate::sql;
use crate::StoreError;

/// Schema migration run while a database moves to a newer version.
pub type Upgrade = fn(&mut VersionTransaction<'_>) -> Result<(), StoreError>;

const DEFAULT_BUSY_MS: u64 = 5000;

/// Opens named databases under a root directory and tracks every handle it
/// hands out, so upgrades can ask other holders to step aside.
#[derive(Clone)]
pub struct Factory {
    inner: Arc<FactoryInner>,
}

struct FactoryInner {
    root: PathBuf,
    busy_timeout: Duration,
    open_lock: Mutex<()>,
    handles: Mutex<HashMap<String, Vec<Weak<DatabaseInner>>>>,
}

impl Factory {
    /// Busy timeout defaults to 5000ms; override with LARDER_SQLITE_BUSY_MS.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let busy_ms: u64 = std::env::var("LARDER_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BUSY_MS);
        Self::with_busy_timeout(root, Duration::from_millis(busy_ms))
    }

    pub fn with_busy_timeout(root: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                root: root.into(),
                busy_timeout,
                open_lock: Mutex::new(()),
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn database_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        if !sql::valid_database_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.inner.root.join(format!("{name}.sqlite")))
    }

    /// Number of handles to `name` that are still open.
    pub fn open_handles(&self, name: &str) -> usize {
        self.live_handles(name).len()
    }

    fn live_handles(&self, name: &str) -> Vec<Database> {
        let mut handles = self
            .inner
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let Some(list) = handles.get_mut(name) else {
            return Vec::new();
        };
        list.retain(|w| w.upgrade().is_some_and(|inner| !Database::from_inner(inner).is_closed()));
        list.iter()
            .filter_map(Weak::upgrade)
            .map(Database::from_inner)
            .collect()
    }

    fn register(&self, db: &Database) {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(db.name().to_string())
            .or_default()
            .push(db.downgrade());
    }

    /// Open `name` at `version`, creating or upgrading it as needed.
    ///
    /// Opening below the stored version fails with `VersionError`. Opening
    /// above it notifies every other open handle; if any is still open once
    /// the listeners ran, the open fails immediately with `Blocked`.
    pub fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: Option<Upgrade>,
    ) -> Result<Database, StoreError> {
        self.open_inner(name, version, upgrade, None)
    }

    /// `open` with a version-change listener attached before the handle
    /// becomes visible to other openers, so no upgrade can reach it
    /// unobserved.
    pub fn open_observed(
        &self,
        name: &str,
        version: u32,
        upgrade: Option<Upgrade>,
        listener: VersionChangeListener,
    ) -> Result<Database, StoreError> {
        self.open_inner(name, version, upgrade, Some(listener))
    }

    fn open_inner(
        &self,
        name: &str,
        version: u32,
        upgrade: Option<Upgrade>,
        listener: Option<VersionChangeListener>,
    ) -> Result<Database, StoreError> {
        if version == 0 {
            return Err(StoreError::InvalidVersion(version));
        }
        let path = self.database_path(name)?;
        let _serial = self
            .inner
            .open_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        std::fs::create_dir_all(&self.inner.root)?;

        let mut conn = sql::connect(&path, self.inner.busy_timeout)?;
        let current = sql::user_version(&conn)?;
        if version < current {
            return Err(StoreError::Version {
                requested: version,
                current,
            });
        }
        if version > current {
            let change = VersionChange {
                old_version: current,
                new_version: version,
            };
            for db in self.live_handles(name) {
                db.dispatch_version_change(&change);
            }
            let open = self.open_handles(name);
            if open > 0 {
                warn!(
                    target: "larder::store",
                    db = name,
                    version,
                    open,
                    "upgrade blocked by open connections"
                );
                return Err(StoreError::Blocked {
                    name: name.to_string(),
                    version,
                    open,
                });
            }
            // Another process holding a write lock is reported as blocked, not awaited.
            conn.busy_timeout(Duration::ZERO)?;
            let blocked = |err: rusqlite::Error| {
                if is_busy(&err) {
                    StoreError::Blocked {
                        name: name.to_string(),
                        version,
                        open: 0,
                    }
                } else {
                    StoreError::from(err)
                }
            };
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(blocked)?;
            let stored = sql::user_version(&tx)?;
            if stored > version {
                return Err(StoreError::Version {
                    requested: version,
                    current: stored,
                });
            }
            if stored < version {
                if let Some(upgrade) = upgrade {
                    let mut vtx = VersionTransaction {
                        conn: &tx,
                        old_version: stored,
                        new_version: version,
                    };
                    upgrade(&mut vtx)?;
                }
                sql::set_user_version(&tx, version)?;
            }
            tx.commit().map_err(blocked)?;
            conn.busy_timeout(self.inner.busy_timeout)?;
            info!(
                target: "larder::store",
                db = name,
                from = stored,
                to = version,
                "database upgraded"
            );
        }

        let store_names = sql::object_store_names(&conn)?;
        drop(conn);
        let db = Database::new(name, version, path, self.inner.busy_timeout, store_names);
        if let Some(listener) = listener {
            db.add_listener(listener);
        }
        self.register(&db);
        Ok(db)
    }

    /// `open` on the blocking pool.
    pub async fn open_async(
        &self,
        name: &str,
        version: u32,
        upgrade: Option<Upgrade>,
    ) -> Result<Database, StoreError> {
        let factory = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || factory.open(&name, version, upgrade))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// `open_observed` on the blocking pool.
    pub async fn open_observed_async(
        &self,
        name: &str,
        version: u32,
        upgrade: Option<Upgrade>,
        listener: VersionChangeListener,
    ) -> Result<Database, StoreError> {
        let factory = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            factory.open_observed(&name, version, upgrade, listener)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

/// Schema access granted to an upgrade callback.
pub struct VersionTransaction<'a> {
    conn: &'a rusqlite::Connection,
    old_version: u32,
    new_version: u32,
}

impl VersionTransaction<'_> {
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn object_store_names(&self) -> Result<Vec<String>, StoreError> {
        sql::object_store_names(self.conn)
    }

    pub fn contains_object_store(&self, store: &str) -> Result<bool, StoreError> {
        sql::table_exists(self.conn, &sql::table_name(store)?)
    }

    pub fn create_object_store(&mut self, store: &str) -> Result<(), StoreError> {
        let table = sql::table_name(store)?;
        if sql::table_exists(self.conn, &table)? {
            return Err(StoreError::Constraint(store.to_string()));
        }
        sql::create_table(self.conn, &table)
    }

    pub fn delete_object_store(&mut self, store: &str) -> Result<(), StoreError> {
        let table = sql::table_name(store)?;
        if !sql::table_exists(self.conn, &table)? {
            return Err(StoreError::NotFound(store.to_string()));
        }
        sql::drop_table(self.conn, &table)
    }
}
