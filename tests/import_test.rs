use anyhow::Result;
use mp_harvest::pipeline::import::{read_csv_rows, Importer};
use mp_harvest::pipeline::normalize::normalize;
use mp_harvest::pipeline::persist::save_dataset;
use mp_harvest::storage::MaterialStore;
use mp_harvest::types::FlatRow;
use serde_json::{json, Value};
use std::fs;
use tempfile::tempdir;

fn flat(value: Value) -> FlatRow {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn imports_then_updates_single_entity() -> Result<()> {
    let dir = tempdir()?;
    let mut store = MaterialStore::open(dir.path().join("materials.db"))?;

    let first = vec![flat(json!({"material_id": "mp-149", "elements": "Si", "band_gap": "0.611"}))];
    let report = Importer::new(&mut store, 25).import_rows(&first)?;
    assert_eq!(report.inserted, 1);

    let stored = store.get_material("mp-149")?.unwrap();
    assert_eq!(stored.elements.as_deref(), Some("Si"));
    assert_eq!(stored.nelements, Some(1));
    assert_eq!(stored.band_gap, Some(0.611));

    let second = vec![flat(json!({"material_id": "mp-149", "elements": "Si", "band_gap": "0.700"}))];
    let report = Importer::new(&mut store, 25).import_rows(&second)?;
    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 0);

    assert_eq!(store.count_materials()?, 1);
    assert_eq!(store.get_material("mp-149")?.unwrap().band_gap, Some(0.7));
    Ok(())
}

#[test]
fn malformed_cells_degrade_to_null() -> Result<()> {
    let mut store = MaterialStore::open_in_memory()?;
    let rows = vec![flat(json!({
        "material_id": "mp-13",
        "band_gap": "abc",
        "nsites": "NULL",
        "is_stable": "maybe",
        "collected_at": "yesterday",
        "elements": ""
    }))];
    let report = Importer::new(&mut store, 25).import_rows(&rows)?;
    assert_eq!(report.inserted, 1);
    assert_eq!(report.errors, 0);

    let stored = store.get_material("mp-13")?.unwrap();
    assert_eq!(stored.band_gap, None);
    assert_eq!(stored.nsites, None);
    assert_eq!(stored.is_stable, None);
    assert_eq!(stored.collected_at, None);
    assert_eq!(stored.nelements, None);
    Ok(())
}

#[test]
fn directory_import_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let data_dir = dir.path().join("mp_data");

    let mut specific = vec![
        normalize(&json!({"material_id": "mp-149", "formula_pretty": "Si", "elements": ["Si"], "band_gap": 0.611}), "specific_ids"),
        normalize(&json!({"material_id": "mp-390", "formula_pretty": "TiO2", "elements": ["O", "Ti"], "band_gap": 2.059}), "specific_ids"),
    ];
    let mut values = serde_json::Map::new();
    values.insert("cbm".into(), json!(6.227));
    values.insert("vbm".into(), json!(5.617));
    values.insert("is_gap_direct".into(), Value::Null);
    specific[0].attach_properties("electronic_structure", &values);

    let semis = vec![normalize(&json!({"material_id": "mp-390", "formula_pretty": "TiO2", "band_gap": 2.059}), "semiconductors")];
    save_dataset(&specific, "comprehensive_dataset", &data_dir)?;
    save_dataset(&semis, "semiconductors", &data_dir)?;

    let db_path = dir.path().join("materials.db");
    let mut store = MaterialStore::open(&db_path)?;

    let first = Importer::new(&mut store, 1).import_directory(&data_dir)?;
    assert_eq!(first.csv_files.len(), 2);
    let names: Vec<String> = first
        .csv_files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names[0].starts_with("semiconductors"));
    assert!(names[1].starts_with("comprehensive_dataset"));
    assert!(first.failed_files.is_empty());
    assert_eq!(first.materials.inserted, 2);
    assert_eq!(first.materials.updated, 1);
    assert_eq!(first.properties.inserted, 2);

    let second = Importer::new(&mut store, 1).import_directory(&data_dir)?;
    assert_eq!(second.materials.inserted, 0);
    assert_eq!(second.materials.updated, 3);
    assert_eq!(second.properties.inserted, 0);

    assert_eq!(store.count_materials()?, 2);
    assert_eq!(store.count_properties()?, 2);
    let props = store.properties_for("mp-149")?;
    assert!(props.iter().all(|p| p.source_type == "electronic_structure"));

    // the comprehensive union is imported last, so its columns survive
    let tio2 = store.get_material("mp-390")?.unwrap();
    assert_eq!(tio2.query_type.as_deref(), Some("specific_ids"));
    assert_eq!(tio2.elements.as_deref(), Some("O,Ti"));
    assert_eq!(tio2.nelements, Some(2));
    Ok(())
}

#[test]
fn failing_row_does_not_abort_the_batch() -> Result<()> {
    let dir = tempdir()?;
    let csv_path = dir.path().join("rows.csv");
    let long_id = "mp-".repeat(30);
    fs::write(
        &csv_path,
        format!("material_id,elements,band_gap\nmp-1,Si,0.5\n{long_id},O,1.0\n,Fe,0.0\nmp-2,\"Ga,N\",3.2\n"),
    )?;

    let rows = read_csv_rows(&csv_path)?.rows;
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[2]["material_id"], Value::Null);

    let mut store = MaterialStore::open_in_memory()?;
    let report = Importer::new(&mut store, 25).import_csv_file(&csv_path)?;
    assert_eq!(report.inserted, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.get_material("mp-2")?.unwrap().nelements, Some(2));
    Ok(())
}

#[test]
fn ragged_csv_does_not_abort_the_directory() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("a_bad.csv"), "material_id,band_gap\nmp-1,0.5\nmp-2,0.6,extra\n")?;
    fs::write(dir.path().join("b_good.csv"), "material_id,band_gap\nmp-3,1.0\n")?;

    let ragged = read_csv_rows(&dir.path().join("a_bad.csv"))?;
    assert_eq!(ragged.rows.len(), 1);
    assert_eq!(ragged.malformed, 1);

    let mut store = MaterialStore::open_in_memory()?;
    let summary = Importer::new(&mut store, 25).import_directory(dir.path())?;
    assert_eq!(summary.materials.inserted, 2);
    assert_eq!(summary.materials.errors, 1);
    assert!(summary.failed_files.is_empty());

    assert!(store.get_material("mp-1")?.is_some());
    assert!(store.get_material("mp-2")?.is_none());
    assert_eq!(store.get_material("mp-3")?.unwrap().band_gap, Some(1.0));
    Ok(())
}

#[test]
fn unreadable_files_are_recorded_and_skipped() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("a_invalid.csv"), b"material_id\n\xff\xfe\n".as_slice())?;
    fs::write(dir.path().join("b_good.csv"), "material_id,band_gap\nmp-3,1.0\n")?;
    fs::write(dir.path().join("comprehensive_dataset_broken.json"), "{not json")?;

    let mut store = MaterialStore::open_in_memory()?;
    let summary = Importer::new(&mut store, 25).import_directory(dir.path())?;
    assert_eq!(summary.materials.inserted, 1);
    assert_eq!(summary.failed_files.len(), 1);
    assert!(summary.failed_files[0].ends_with("comprehensive_dataset_broken.json"));
    assert_eq!(store.count_properties()?, 0);
    Ok(())
}

#[test]
fn missing_directory_or_csv_files_is_fatal() -> Result<()> {
    let dir = tempdir()?;
    let mut store = MaterialStore::open_in_memory()?;
    let mut importer = Importer::new(&mut store, 25);

    assert!(importer.import_directory(&dir.path().join("absent")).is_err());
    assert!(importer.import_directory(dir.path()).is_err());
    Ok(())
}
