use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::{params, Connection, InterruptHandle, OptionalExtension};
use serde_json::Value;

use crate::sql;
use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// One stored record as yielded by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    pub value: Value,
}

/// Aborts a transaction from another thread. Safe to call at any time;
/// aborting a finished transaction does nothing.
#[derive(Clone)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
    interrupt: Arc<InterruptHandle>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.interrupt.interrupt();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

pub struct Transaction {
    conn: Connection,
    mode: TransactionMode,
    db_name: String,
    abort: AbortHandle,
    finished: bool,
}

impl Transaction {
    pub(crate) fn begin(
        conn: Connection,
        mode: TransactionMode,
        db_name: &str,
    ) -> Result<Self, StoreError> {
        match mode {
            TransactionMode::ReadOnly => {
                conn.pragma_update(None, "query_only", true)?;
                conn.execute_batch("BEGIN DEFERRED")?;
            }
            TransactionMode::ReadWrite => conn.execute_batch("BEGIN IMMEDIATE")?,
        }
        let abort = AbortHandle {
            aborted: Arc::new(AtomicBool::new(false)),
            interrupt: Arc::new(conn.get_interrupt_handle()),
        };
        Ok(Self {
            conn,
            mode,
            db_name: db_name.to_string(),
            abort,
            finished: false,
        })
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn database_name(&self) -> &str {
        &self.db_name
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn ensure_active(&self) -> Result<(), StoreError> {
        if self.abort.is_aborted() {
            return Err(StoreError::Aborted);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        self.ensure_active()?;
        if self.mode == TransactionMode::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn table(&self, store: &str) -> Result<String, StoreError> {
        let table = sql::table_name(store)?;
        if !sql::table_exists(&self.conn, &table)? {
            return Err(StoreError::NotFound(store.to_string()));
        }
        Ok(table)
    }

    pub fn object_store_names(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_active()?;
        sql::object_store_names(&self.conn)
    }

    pub fn get(&self, store: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.ensure_active()?;
        let table = self.table(store)?;
        let raw: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT value FROM \"{table}\" WHERE key=?"),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, store: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let table = self.table(store)?;
        let raw = serde_json::to_string(value)?;
        self.conn.execute(
            &format!(
                "INSERT INTO \"{table}\"(key,value) VALUES (?,?) \
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value"
            ),
            params![key, raw],
        )?;
        Ok(())
    }

    pub fn delete(&self, store: &str, key: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let table = self.table(store)?;
        let n = self
            .conn
            .execute(&format!("DELETE FROM \"{table}\" WHERE key=?"), params![key])?;
        Ok(n > 0)
    }

    pub fn count(&self, store: &str) -> Result<u64, StoreError> {
        self.ensure_active()?;
        let table = self.table(store)?;
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                row.get(0)
            })?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Walk every record of `store` in key order. The visitor may stop the
    /// cursor early with `ControlFlow::Break`. Returns the number of records
    /// handed to the visitor.
    pub fn scan<F>(&self, store: &str, mut visit: F) -> Result<u64, StoreError>
    where
        F: FnMut(Record) -> ControlFlow<()>,
    {
        self.ensure_active()?;
        let table = self.table(store)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT key, value FROM \"{table}\" ORDER BY key"))?;
        let mut rows = stmt.query([])?;
        let mut visited = 0u64;
        while let Some(row) = rows.next()? {
            self.ensure_active()?;
            let key: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let value: Value = serde_json::from_str(&raw)?;
            visited += 1;
            if visit(Record { key, value }).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        self.ensure_active()?;
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn abort(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            // Fails harmlessly when SQLite already rolled back after an interrupt.
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
