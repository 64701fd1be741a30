use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use larder_store::Factory;
use larder_worker::schema::{self, BATCHES_STORE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::StoreArgs;

#[derive(Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Batch records as CSV (with a header row) or a JSON array
    #[arg(long)]
    pub file: PathBuf,
}

/// One CSV row. Column names follow the stored record fields.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct CsvBatch {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_id: Option<String>,
    cost: f64,
    stock: f64,
    is_active: bool,
}

fn read_csv(path: &Path) -> Result<Vec<(Option<String>, Value)>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for (line, row) in reader.deserialize::<CsvBatch>().enumerate() {
        let row = row.with_context(|| format!("row {}", line + 1))?;
        let key = row.id.clone().filter(|s| !s.is_empty());
        rows.push((key, serde_json::to_value(&row)?));
    }
    Ok(rows)
}

fn read_json(path: &Path) -> Result<Vec<(Option<String>, Value)>> {
    let text = std::fs::read_to_string(path)?;
    let Value::Array(items) = serde_json::from_str(&text)? else {
        bail!("expected a JSON array of batch records");
    };
    Ok(items
        .into_iter()
        .map(|item| {
            let key = item.get("id").and_then(Value::as_str).map(str::to_string);
            (key, item)
        })
        .collect())
}

pub fn run(args: ImportArgs) -> Result<()> {
    let settings = args.store.settings()?;
    let ext = args
        .file
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let rows = match ext.as_deref() {
        Some("csv") => read_csv(&args.file),
        Some("json") => read_json(&args.file),
        _ => bail!("unsupported file type: {}", args.file.display()),
    }
    .with_context(|| format!("reading {}", args.file.display()))?;

    let factory = Factory::new(&settings.data_dir);
    let db = factory.open(&settings.db_name, settings.db_version, Some(schema::upgrade))?;
    let written = db.write(|tx| {
        for (key, record) in &rows {
            let key = key
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            tx.put(BATCHES_STORE, &key, record)?;
        }
        Ok(rows.len())
    })?;
    db.close();
    info!(target: "larder::store", written, db = %settings.db_name, "batches imported");
    println!("Imported {written} batches");
    Ok(())
}
