use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::schema::{DB_NAME, DB_VERSION};

pub const DEFAULT_CHUNK_SIZE: u64 = 1000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct StoreConfig {
    /// Directory holding the database files
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Database name (file stem)
    #[serde(default)]
    pub name: Option<String>,
    /// Schema version the worker opens the database at
    #[serde(default)]
    #[schemars(range(min = 1))]
    pub version: Option<u32>,
}

/// What to do with a calculation requested while another one is running.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Run both; each gets its own read transaction.
    #[default]
    Allow,
    /// Fail the newcomer with SCAN_IN_PROGRESS.
    Reject,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ScanConfig {
    /// Records between two progress messages
    #[serde(default)]
    #[schemars(range(min = 1))]
    pub chunk_size: Option<u64>,
    /// Wall-clock budget for one scan, in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub overlap: Option<OverlapPolicy>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

fn schema_value() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(Config))
        .expect("Config derives JsonSchema; its schema always serializes")
}

static VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    validator_for(&schema_value()).expect("schemars emits a well-formed draft-07 schema")
});

/// JSON schema of the `[store]`/`[scan]` configuration file.
pub fn config_schema_json() -> serde_json::Value {
    schema_value()
}

pub fn write_schema_file(path: &str) -> std::io::Result<()> {
    let text = serde_json::to_string_pretty(&config_schema_json())?;
    std::fs::write(path, text)
}

/// Render a JSON pointer such as `/scan/chunk_size` as `[scan] chunk_size`.
fn config_key(pointer: &str) -> String {
    let mut parts = pointer.trim_start_matches('/').splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(""), _) | (None, _) => "<root>".to_string(),
        (Some(section), None) => format!("[{section}]"),
        (Some(section), Some(key)) => format!("[{section}] {}", key.replace('/', ".")),
    }
}

/// Parse TOML text, rejecting values the schema does not allow before
/// deserializing.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let as_json = serde_json::to_value(&raw)?;
    let problems: Vec<String> = VALIDATOR
        .iter_errors(&as_json)
        .map(|e| format!("{}: {}", config_key(&e.instance_path.to_string()), e))
        .collect();
    if !problems.is_empty() {
        anyhow::bail!("invalid larder config: {}", problems.join("; "));
    }
    Ok(toml::from_str(content)?)
}

pub fn load_config(path: &str) -> Result<Config> {
    parse_config(&std::fs::read_to_string(path)?)
}

/// Effective worker settings: config file values, then environment
/// overrides, then defaults.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub data_dir: PathBuf,
    pub db_name: String,
    pub db_version: u32,
    pub chunk_size: u64,
    pub timeout: Duration,
    pub overlap: OverlapPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            db_name: DB_NAME.to_string(),
            db_version: DB_VERSION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            overlap: OverlapPolicy::Allow,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerSettings {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Resolve settings from a parsed config. Honours LARDER_DATA_DIR,
    /// LARDER_SCAN_TIMEOUT_MS and LARDER_SCAN_CHUNK_SIZE.
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        let data_dir = std::env::var("LARDER_DATA_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| cfg.store.data_dir.clone())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let chunk_size = env_u64("LARDER_SCAN_CHUNK_SIZE")
            .or(cfg.scan.chunk_size)
            .unwrap_or(defaults.chunk_size)
            .max(1);
        let timeout_ms = env_u64("LARDER_SCAN_TIMEOUT_MS")
            .or(cfg.scan.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Self {
            data_dir,
            db_name: cfg.store.name.clone().unwrap_or(defaults.db_name),
            db_version: cfg.store.version.unwrap_or(defaults.db_version).max(1),
            chunk_size,
            timeout: Duration::from_millis(timeout_ms),
            overlap: cfg.scan.overlap.unwrap_or_default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_database(mut self, name: impl Into<String>, version: u32) -> Self {
        self.db_name = name.into();
        self.db_version = version;
        self
    }
}
