//! SQLite plumbing shared by the factory and transactions. Every object store
//! is a table `os_<name>` holding `(key TEXT, value TEXT)` with JSON values.

use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;

use crate::StoreError;

const TABLE_PREFIX: &str = "os_";

pub(crate) fn connect(path: &Path, busy_timeout: Duration) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    // Pragmas tuned for short-lived per-transaction connections
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(busy_timeout)?;
    let _ = conn.pragma_update(None, "temp_store", "MEMORY");
    Ok(conn)
}

pub(crate) fn user_version(conn: &Connection) -> Result<u32, StoreError> {
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(u32::try_from(v).unwrap_or(0))
}

pub(crate) fn set_user_version(conn: &Connection, version: u32) -> Result<(), StoreError> {
    conn.pragma_update(None, "user_version", i64::from(version))?;
    Ok(())
}

pub(crate) fn valid_database_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub(crate) fn table_name(store: &str) -> Result<String, StoreError> {
    let ok = !store.is_empty() && store.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        return Err(StoreError::InvalidStoreName(store.to_string()));
    }
    Ok(format!("{TABLE_PREFIX}{store}"))
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
        params![table],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub(crate) fn object_store_names(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND substr(name,1,3)=? ORDER BY name",
    )?;
    let mut rows = stmt.query(params![TABLE_PREFIX])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        out.push(name[TABLE_PREFIX.len()..].to_string());
    }
    Ok(out)
}

pub(crate) fn create_table(conn: &Connection, table: &str) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "CREATE TABLE \"{table}\" (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);"
    ))?;
    Ok(())
}

pub(crate) fn drop_table(conn: &Connection, table: &str) -> Result<(), StoreError> {
    conn.execute_batch(&format!("DROP TABLE \"{table}\";"))?;
    Ok(())
}
