use crate::constants::{PREFIX_COMPREHENSIVE, PROPERTY_SOURCES};
use crate::error::{MaterialsError, Result};
use crate::metrics::names::{ROWS_FAILED_TOTAL, ROWS_INSERTED_TOTAL, ROWS_SKIPPED_TOTAL, ROWS_UPDATED_TOTAL};
use crate::pipeline::coerce::{count_elements, is_null_token, to_bool, to_datetime, to_float, to_int, to_text};
use crate::storage::MaterialStore;
use crate::types::{FlatRow, MaterialRow, PropertyRow, UpsertOutcome};
use metrics::counter;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

/// Why a single row was not written.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("row has no material_id")]
    MissingIdentifier,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Counts for one import pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ImportReport {
    pub fn processed(&self) -> usize {
        self.inserted + self.updated
    }

    fn absorb(&mut self, other: &ImportReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// Result of importing a whole data directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryImport {
    pub csv_files: Vec<PathBuf>,
    pub properties_file: Option<PathBuf>,
    /// Files that could not be read at all; the rest of the directory is
    /// still imported.
    pub failed_files: Vec<PathBuf>,
    pub materials: ImportReport,
    pub properties: ImportReport,
}

/// Rows of one CSV file plus the number of records that could not be parsed.
#[derive(Debug, Clone, Default)]
pub struct CsvRows {
    pub rows: Vec<FlatRow>,
    pub malformed: usize,
}

/// Read a CSV file into rows. Cells matching a null token become `null`,
/// everything else stays text for the coercion step. A record that does not
/// parse, or whose width differs from the header, is counted and skipped.
pub fn read_csv_rows(path: &Path) -> Result<CsvRows> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut parsed = CsvRows::default();
    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) if record.len() == headers.len() => record,
            Ok(record) => {
                warn!(
                    row = index,
                    expected = headers.len(),
                    found = record.len(),
                    "Skipping CSV record with wrong field count"
                );
                parsed.malformed += 1;
                continue;
            }
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!(row = index, "Skipping unparsable CSV record: {}", e);
                parsed.malformed += 1;
                continue;
            }
        };
        let mut row = FlatRow::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            let value = if is_null_token(cell) {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            row.insert(header.to_string(), value);
        }
        parsed.rows.push(row);
    }
    Ok(parsed)
}

/// Read a JSON array of records as written by the output writer.
pub fn read_json_dataset(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Array(items) => Ok(items),
        _ => Err(MaterialsError::Config(format!(
            "{} does not contain a JSON array",
            path.display()
        ))),
    }
}

/// Project one flat row onto the `materials` columns. Malformed cells become
/// `None`; only a missing identifier rejects the row.
pub fn material_row_from_flat(row: &FlatRow) -> std::result::Result<MaterialRow, RowError> {
    let cell = |key: &str| row.get(key).unwrap_or(&Value::Null);

    let material_id = to_text(cell("material_id")).ok_or(RowError::MissingIdentifier)?;
    let elements = to_text(cell("elements"));
    let nelements = count_elements(elements.as_deref());

    Ok(MaterialRow {
        material_id,
        formula_pretty: to_text(cell("formula_pretty")),
        formula_anonymous: to_text(cell("formula_anonymous")),
        chemsys: to_text(cell("chemsys")),
        crystal_system: to_text(cell("crystal_system")),
        space_group: to_text(cell("space_group")),
        point_group: to_text(cell("point_group")),
        volume: to_float(cell("volume")),
        density: to_float(cell("density")),
        nsites: to_int(cell("nsites")),
        elements,
        nelements,
        energy_per_atom: to_float(cell("energy_per_atom")),
        formation_energy_per_atom: to_float(cell("formation_energy_per_atom")),
        energy_above_hull: to_float(cell("energy_above_hull")),
        is_stable: to_bool(cell("is_stable")),
        theoretical: to_bool(cell("theoretical")),
        band_gap: to_float(cell("band_gap")),
        cbm: to_float(cell("cbm")),
        vbm: to_float(cell("vbm")),
        is_gap_direct: to_bool(cell("is_gap_direct")),
        structure_volume: to_float(cell("structure_volume")),
        structure_num_sites: to_int(cell("structure_num_sites")),
        structure_formula: to_text(cell("structure_formula")),
        query_type: to_text(cell("query_type")),
        collected_at: to_datetime(cell("collected_at")),
    })
}

/// Auxiliary properties of one dataset record. Groups are read from
/// `properties.<source>` or a top-level `<source>` object; null values are
/// skipped.
pub fn property_rows(record: &Value) -> Vec<PropertyRow> {
    let Some(material_id) = record.get("material_id").and_then(to_text) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for source in PROPERTY_SOURCES {
        let group = record
            .get("properties")
            .and_then(|p| p.get(source))
            .or_else(|| record.get(source))
            .and_then(Value::as_object);
        let Some(group) = group else { continue };

        for (name, value) in group {
            let property_value = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rows.push(PropertyRow {
                material_id: material_id.clone(),
                property_name: name.clone(),
                property_value,
                source_type: source.to_string(),
            });
        }
    }
    rows
}

/// Loads flat rows and auxiliary properties into a [`MaterialStore`].
pub struct Importer<'a> {
    store: &'a mut MaterialStore,
    batch_size: usize,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a mut MaterialStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Upsert rows keyed by `material_id`. Each batch is one transaction and
    /// each row a savepoint inside it, so a failing row is rolled back alone.
    pub fn import_rows(&mut self, rows: &[FlatRow]) -> Result<ImportReport> {
        self.run_batched(rows, "materials", |conn, row| {
            let material = material_row_from_flat(row)?;
            Ok(MaterialStore::upsert_material(conn, &material)?)
        })
    }

    pub fn import_properties(&mut self, props: &[PropertyRow]) -> Result<ImportReport> {
        self.run_batched(props, "material_properties", |conn, prop| {
            Ok(MaterialStore::upsert_property(conn, prop)?)
        })
    }

    pub fn import_csv_file(&mut self, path: &Path) -> Result<ImportReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("import_csv", %run_id, file = %path.display());
        let _enter = span.enter();

        let csv = read_csv_rows(path)?;
        info!("Found {} rows in CSV", csv.rows.len());
        let mut report = self.import_rows(&csv.rows)?;
        if csv.malformed > 0 {
            warn!(malformed = csv.malformed, "Some CSV records could not be parsed");
            report.errors += csv.malformed;
        }
        info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            "Imported {} materials",
            report.processed()
        );
        Ok(report)
    }

    pub fn import_json_properties(&mut self, path: &Path) -> Result<ImportReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("import_properties", %run_id, file = %path.display());
        let _enter = span.enter();

        let records = read_json_dataset(path)?;
        info!("Found {} materials in JSON", records.len());
        let props: Vec<PropertyRow> = records.iter().flat_map(property_rows).collect();
        let report = self.import_properties(&props)?;
        info!("Added {} additional properties", report.processed());
        Ok(report)
    }

    /// Import every CSV in `dir` (per-query datasets first, the comprehensive
    /// union last so its columns win), then the auxiliary properties of the
    /// newest comprehensive JSON dataset. A file that fails is logged and
    /// recorded in `failed_files`; only a missing directory or an empty one is
    /// fatal.
    pub fn import_directory(&mut self, dir: &Path) -> Result<DirectoryImport> {
        if !dir.is_dir() {
            return Err(MaterialsError::Config(format!(
                "Data directory '{}' not found",
                dir.display()
            )));
        }

        let (csv_files, json_files) = dataset_files(dir)?;
        if csv_files.is_empty() {
            return Err(MaterialsError::Config(format!(
                "No CSV files found in '{}'",
                dir.display()
            )));
        }

        let mut summary = DirectoryImport::default();
        for path in &csv_files {
            match self.import_csv_file(path) {
                Ok(report) => summary.materials.absorb(&report),
                Err(e) => {
                    error!(file = %path.display(), "CSV import failed: {}", e);
                    summary.failed_files.push(path.clone());
                }
            }
        }
        summary.csv_files = csv_files;

        let properties_file = json_files
            .into_iter()
            .filter(|p| file_name(p).contains(PREFIX_COMPREHENSIVE))
            .last();
        if let Some(path) = properties_file {
            match self.import_json_properties(&path) {
                Ok(report) => summary.properties = report,
                Err(e) => {
                    error!(file = %path.display(), "Property import failed: {}", e);
                    summary.failed_files.push(path.clone());
                }
            }
            summary.properties_file = Some(path);
        }
        Ok(summary)
    }

    fn run_batched<T, F>(&mut self, items: &[T], table: &str, mut write: F) -> Result<ImportReport>
    where
        F: FnMut(&Connection, &T) -> std::result::Result<UpsertOutcome, RowError>,
    {
        let batch_size = self.batch_size;
        let mut report = ImportReport::default();
        let conn = self.store.connection_mut();

        for (batch_no, batch) in items.chunks(batch_size).enumerate() {
            let mut batch_report = ImportReport::default();
            let mut tx = conn.transaction()?;

            for (offset, item) in batch.iter().enumerate() {
                let index = batch_no * batch_size + offset;
                let sp = tx.savepoint()?;
                match write(&sp, item) {
                    Ok(outcome) => {
                        sp.commit()?;
                        match outcome {
                            UpsertOutcome::Inserted => batch_report.inserted += 1,
                            UpsertOutcome::Updated => batch_report.updated += 1,
                        }
                    }
                    Err(RowError::MissingIdentifier) => {
                        batch_report.skipped += 1;
                    }
                    Err(e) => {
                        // dropping the savepoint rolls the row back
                        warn!(table, row = index, "Row failed: {}", e);
                        batch_report.errors += 1;
                    }
                }
            }

            match tx.commit() {
                Ok(()) => report.absorb(&batch_report),
                Err(e) => {
                    error!(table, batch = batch_no, "Batch commit failed: {}", e);
                    report.skipped += batch_report.skipped;
                    report.errors += batch.len() - batch_report.skipped;
                }
            }
        }

        counter!(ROWS_INSERTED_TOTAL, "table" => table.to_string()).increment(report.inserted as u64);
        counter!(ROWS_UPDATED_TOTAL, "table" => table.to_string()).increment(report.updated as u64);
        counter!(ROWS_SKIPPED_TOTAL, "table" => table.to_string()).increment(report.skipped as u64);
        counter!(ROWS_FAILED_TOTAL, "table" => table.to_string()).increment(report.errors as u64);
        Ok(report)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// CSV and JSON files of a data directory. CSVs whose name contains the
/// comprehensive prefix come last; each group is sorted by name.
fn dataset_files(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut csv_files = Vec::new();
    let mut json_files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => csv_files.push(path),
            Some("json") => json_files.push(path),
            _ => {}
        }
    }
    csv_files.sort_by_key(|p| (file_name(p).contains(PREFIX_COMPREHENSIVE), file_name(p)));
    json_files.sort();
    Ok((csv_files, json_files))
}
