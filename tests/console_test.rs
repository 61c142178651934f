use anyhow::Result;
use mp_harvest::console::{execute, execute_named, CATALOG};
use mp_harvest::error::MaterialsError;
use mp_harvest::pipeline::import::Importer;
use mp_harvest::pipeline::normalize::normalize;
use mp_harvest::pipeline::persist::save_dataset;
use mp_harvest::storage::MaterialStore;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn imported_dataset_answers_catalog_and_ad_hoc_queries() -> Result<()> {
    let dir = tempdir()?;
    let data_dir = dir.path().join("mp_data");
    let records = vec![
        normalize(
            &json!({"material_id": "mp-149", "formula_pretty": "Si", "elements": ["Si"], "band_gap": 0.611,
                    "formation_energy_per_atom": 0.0, "symmetry": {"crystal_system": "Cubic"}}),
            "specific_ids",
        ),
        normalize(
            &json!({"material_id": "mp-390", "formula_pretty": "TiO2", "elements": ["O", "Ti"], "band_gap": 2.059,
                    "formation_energy_per_atom": -3.3, "symmetry": {"crystal_system": "Tetragonal"}}),
            "specific_ids",
        ),
    ];
    save_dataset(&records, "comprehensive_dataset", &data_dir)?;

    let mut store = MaterialStore::open(dir.path().join("materials.db"))?;
    Importer::new(&mut store, 25).import_directory(&data_dir)?;

    let (_, by_system) = execute_named(&store, "A1")?;
    assert_eq!(by_system.result.columns[0], "crystal_system");
    assert_eq!(by_system.result.rows.len(), 2);

    let oxides = execute(
        &store,
        "SELECT material_id, REPLACE(elements, ',', ' ') AS spaced FROM materials \
         WHERE instr(',' || elements || ',', ',O,') > 0;",
    )?;
    assert_eq!(oxides.result.to_records(), vec![json!({"material_id": "mp-390", "spaced": "O Ti"})]);

    assert!(matches!(
        execute(&store, "UPDATE materials SET band_gap = 0"),
        Err(MaterialsError::UnsafeSql(_))
    ));
    for query in CATALOG {
        execute(&store, query.sql)?;
    }
    assert_eq!(store.get_material("mp-149")?.unwrap().band_gap, Some(0.611));
    Ok(())
}
