//! Background inventory worker.
//!
//! A controller posts [`Command`]s to a [`WorkerHandle`]; the worker keeps a
//! single store connection open between requests, values every batch in the
//! `product_batches` partition, and streams `PROGRESS` messages followed by
//! exactly one `STATS_RESULT` or `ERROR` per calculation.

mod aggregate;
pub mod config;
mod connection;
mod error;
mod scan;
pub mod schema;
#[cfg(test)]
mod test_support;
mod worker;

pub use aggregate::{round2, BatchRecord, Tally};
pub use config::{
    config_schema_json, load_config, parse_config, write_schema_file, Config, OverlapPolicy,
    WorkerSettings,
};
pub use connection::{ConnectionManager, InvalidationListener};
pub use error::WorkerError;
pub use larder_protocol::{Command, ErrorCode, Event, ProgressPayload, StatsPayload};
pub use scan::{run_scan, PhaseTracker, ScanOptions, ScanPhase};
pub use worker::{spawn, WorkerHandle};
