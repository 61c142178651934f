use crate::error::Result;
use crate::pipeline::normalize::to_tabular_row;
use crate::types::{FlatRow, NormalizedRecord};
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Files written for one dataset.
#[derive(Debug, Clone)]
pub struct SavedFiles {
    pub json: PathBuf,
    pub csv: PathBuf,
    pub records: usize,
}

/// Write `<prefix>_<timestamp>.json` and `.csv` into `output_dir`. Nothing is
/// written for an empty dataset.
#[instrument(skip(records, output_dir), fields(count = records.len()))]
pub fn save_dataset(
    records: &[NormalizedRecord],
    prefix: &str,
    output_dir: &Path,
) -> Result<Option<SavedFiles>> {
    if records.is_empty() {
        info!("No materials to save for {}", prefix);
        return Ok(None);
    }

    fs::create_dir_all(output_dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let base = format!("{prefix}_{timestamp}");
    let json_path = output_dir.join(format!("{base}.json"));
    let csv_path = output_dir.join(format!("{base}.csv"));

    write_json(records, &json_path)?;
    info!("Saved JSON: {}", json_path.display());
    write_csv(records, &csv_path)?;
    info!("Saved CSV: {}", csv_path.display());

    Ok(Some(SavedFiles {
        json: json_path,
        csv: csv_path,
        records: records.len(),
    }))
}

/// Pretty-printed JSON array of records.
pub fn write_json(records: &[NormalizedRecord], path: &Path) -> Result<()> {
    let json_content = serde_json::to_string_pretty(records)?;
    fs::write(path, json_content)?;
    Ok(())
}

/// One row per record; the header is the union of row keys in first-seen
/// order.
pub fn write_csv(records: &[NormalizedRecord], path: &Path) -> Result<()> {
    let rows: Vec<FlatRow> = records.iter().map(to_tabular_row).collect();

    let mut headers: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&headers)?;
    for row in &rows {
        let cells = headers
            .iter()
            .map(|h| row.get(h).map(cell_text).unwrap_or_default());
        writer.write_record(cells)?;
    }
    writer.flush()?;
    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
