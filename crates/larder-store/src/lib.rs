//! Local, versioned key-record store on SQLite: named databases holding named
//! object stores of JSON records, with upgrade-time version change
//! notifications between handles.

mod database;
mod error;
mod factory;
mod sql;
mod transaction;

pub use database::{Database, VersionChange, VersionChangeListener};
pub use error::StoreError;
pub use factory::{Factory, Upgrade, VersionTransaction};
pub use transaction::{AbortHandle, Record, Transaction, TransactionMode};
