use crate::error::{MaterialsError, Result};
use crate::types::{MaterialRow, PropertyRow, UpsertOutcome};
use chrono::NaiveDateTime;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// DDL of the primary table; also shown to the LLM as the schema.
pub const MATERIALS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS materials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    material_id TEXT NOT NULL UNIQUE CHECK (length(material_id) <= 50),
    formula_pretty TEXT,
    formula_anonymous TEXT,
    chemsys TEXT,
    crystal_system TEXT,
    space_group TEXT,
    point_group TEXT,
    volume REAL,
    density REAL,
    nsites INTEGER,
    elements TEXT,
    nelements INTEGER,
    energy_per_atom REAL,
    formation_energy_per_atom REAL,
    energy_above_hull REAL,
    is_stable BOOLEAN,
    theoretical BOOLEAN,
    band_gap REAL,
    cbm REAL,
    vbm REAL,
    is_gap_direct BOOLEAN,
    structure_volume REAL,
    structure_num_sites INTEGER,
    structure_formula TEXT,
    query_type TEXT,
    collected_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    revision INTEGER NOT NULL DEFAULT 1
);"#;

const SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_formula ON materials (formula_pretty);
CREATE INDEX IF NOT EXISTS idx_crystal_system ON materials (crystal_system);
CREATE INDEX IF NOT EXISTS idx_band_gap ON materials (band_gap);
CREATE INDEX IF NOT EXISTS idx_stable ON materials (is_stable);
CREATE INDEX IF NOT EXISTS idx_elements ON materials (elements);
CREATE INDEX IF NOT EXISTS idx_query_type ON materials (query_type);

CREATE TABLE IF NOT EXISTS material_properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    material_id TEXT NOT NULL,
    property_name TEXT NOT NULL,
    property_value TEXT,
    source_type TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    revision INTEGER NOT NULL DEFAULT 1
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_material_property_source
    ON material_properties (material_id, property_name, source_type);
CREATE INDEX IF NOT EXISTS idx_material_property
    ON material_properties (material_id, property_name);
"#;

const UPSERT_MATERIAL: &str = r#"
INSERT INTO materials (
    material_id, formula_pretty, formula_anonymous, chemsys,
    crystal_system, space_group, point_group, volume, density, nsites,
    elements, nelements, energy_per_atom, formation_energy_per_atom,
    energy_above_hull, is_stable, theoretical, band_gap, cbm, vbm,
    is_gap_direct, structure_volume, structure_num_sites, structure_formula,
    query_type, collected_at
) VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
    ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26
)
ON CONFLICT(material_id) DO UPDATE SET
    formula_pretty = excluded.formula_pretty,
    formula_anonymous = excluded.formula_anonymous,
    chemsys = excluded.chemsys,
    crystal_system = excluded.crystal_system,
    space_group = excluded.space_group,
    point_group = excluded.point_group,
    volume = excluded.volume,
    density = excluded.density,
    nsites = excluded.nsites,
    elements = excluded.elements,
    nelements = excluded.nelements,
    energy_per_atom = excluded.energy_per_atom,
    formation_energy_per_atom = excluded.formation_energy_per_atom,
    energy_above_hull = excluded.energy_above_hull,
    is_stable = excluded.is_stable,
    theoretical = excluded.theoretical,
    band_gap = excluded.band_gap,
    cbm = excluded.cbm,
    vbm = excluded.vbm,
    is_gap_direct = excluded.is_gap_direct,
    structure_volume = excluded.structure_volume,
    structure_num_sites = excluded.structure_num_sites,
    structure_formula = excluded.structure_formula,
    query_type = excluded.query_type,
    collected_at = excluded.collected_at,
    updated_at = datetime('now'),
    revision = materials.revision + 1
RETURNING revision
"#;

const UPSERT_PROPERTY: &str = r#"
INSERT INTO material_properties (material_id, property_name, property_value, source_type)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(material_id, property_name, source_type) DO UPDATE SET
    property_value = excluded.property_value,
    revision = material_properties.revision + 1
RETURNING revision
"#;

const SELECT_MATERIAL_COLUMNS: &str = "material_id, formula_pretty, formula_anonymous, chemsys, \
    crystal_system, space_group, point_group, volume, density, nsites, elements, nelements, \
    energy_per_atom, formation_energy_per_atom, energy_above_hull, is_stable, theoretical, \
    band_gap, cbm, vbm, is_gap_direct, structure_volume, structure_num_sites, structure_formula, \
    query_type, collected_at";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Persisted materials, keyed by `material_id`.
pub struct MaterialStore {
    conn: Connection,
}

impl MaterialStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn };
        store.migrate()?;
        info!("Opened material store at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(MATERIALS_DDL)?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Insert-or-update in one statement. Works on a plain connection, a
    /// transaction or a savepoint.
    pub fn upsert_material(conn: &Connection, row: &MaterialRow) -> rusqlite::Result<UpsertOutcome> {
        let collected_at = row
            .collected_at
            .map(|dt| dt.format(DATETIME_FORMAT).to_string());
        let revision: i64 = conn.query_row(
            UPSERT_MATERIAL,
            params![
                row.material_id,
                row.formula_pretty,
                row.formula_anonymous,
                row.chemsys,
                row.crystal_system,
                row.space_group,
                row.point_group,
                row.volume,
                row.density,
                row.nsites,
                row.elements,
                row.nelements,
                row.energy_per_atom,
                row.formation_energy_per_atom,
                row.energy_above_hull,
                row.is_stable,
                row.theoretical,
                row.band_gap,
                row.cbm,
                row.vbm,
                row.is_gap_direct,
                row.structure_volume,
                row.structure_num_sites,
                row.structure_formula,
                row.query_type,
                collected_at,
            ],
            |r| r.get(0),
        )?;
        Ok(if revision == 1 {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    /// Insert a property, or refresh its value if the
    /// (material, name, source) triple already exists.
    pub fn upsert_property(conn: &Connection, prop: &PropertyRow) -> rusqlite::Result<UpsertOutcome> {
        let revision: i64 = conn.query_row(
            UPSERT_PROPERTY,
            params![prop.material_id, prop.property_name, prop.property_value, prop.source_type],
            |r| r.get(0),
        )?;
        Ok(if revision == 1 {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    pub fn get_material(&self, material_id: &str) -> Result<Option<MaterialRow>> {
        let sql = format!("SELECT {SELECT_MATERIAL_COLUMNS} FROM materials WHERE material_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![material_id], material_from_row)
            .optional()?;
        Ok(row)
    }

    /// First `limit` materials in insertion order.
    pub fn sample_materials(&self, limit: usize) -> Result<Vec<MaterialRow>> {
        let sql = format!("SELECT {SELECT_MATERIAL_COLUMNS} FROM materials ORDER BY id LIMIT ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], material_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_materials(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM materials", [], |r| r.get(0))?)
    }

    pub fn count_properties(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM material_properties", [], |r| r.get(0))?)
    }

    pub fn properties_for(&self, material_id: &str) -> Result<Vec<PropertyRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT material_id, property_name, property_value, source_type
             FROM material_properties WHERE material_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![material_id], |r| {
                Ok(PropertyRow {
                    material_id: r.get(0)?,
                    property_name: r.get(1)?,
                    property_value: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    source_type: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Summary statistics over the whole store.
    pub fn verification_report(&self) -> Result<VerificationReport> {
        let total_materials = self.count_materials()?;
        let total_properties = self.count_properties()?;

        let by_crystal_system = self.grouped_counts(
            "SELECT crystal_system, COUNT(*) FROM materials
             GROUP BY crystal_system ORDER BY COUNT(*) DESC, crystal_system",
        )?;
        let by_query_type = self.grouped_counts(
            "SELECT query_type, COUNT(*) FROM materials
             GROUP BY query_type ORDER BY COUNT(*) DESC, query_type",
        )?;
        let top_formulas = self.grouped_counts(
            "SELECT formula_pretty, COUNT(*) FROM materials WHERE formula_pretty IS NOT NULL
             GROUP BY formula_pretty ORDER BY COUNT(*) DESC, formula_pretty LIMIT 5",
        )?;

        let count_where = |clause: &str| -> Result<i64> {
            let sql = format!("SELECT COUNT(*) FROM materials WHERE {clause}");
            Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
        };
        let semiconductors = count_where("band_gap > 0.1 AND band_gap < 5.0")?;
        let metals = count_where("band_gap = 0.0")?;
        let insulators = count_where("band_gap >= 5.0")?;
        let stable = count_where("is_stable = 1")?;

        let band_gap = self.column_stats("band_gap")?;
        let formation_energy = self.column_stats("formation_energy_per_atom")?;

        let mut stmt = self.conn.prepare(
            "SELECT nelements, COUNT(*) FROM materials WHERE nelements IS NOT NULL
             GROUP BY nelements ORDER BY nelements",
        )?;
        let element_distribution = stmt
            .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(VerificationReport {
            total_materials,
            total_properties,
            by_crystal_system,
            by_query_type,
            semiconductors,
            metals,
            insulators,
            stable,
            band_gap,
            formation_energy,
            element_distribution,
            top_formulas,
            samples: self.sample_materials(5)?,
        })
    }

    /// Headline counts for the query console.
    pub fn database_stats(&self) -> Result<DatabaseStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |r| r.get(0))?) };
        Ok(DatabaseStats {
            total_materials: self.count_materials()?,
            crystal_systems: count(
                "SELECT COUNT(DISTINCT crystal_system) FROM materials WHERE crystal_system IS NOT NULL",
            )?,
            semiconductors: count("SELECT COUNT(*) FROM materials WHERE band_gap BETWEEN 0.1 AND 3.0")?,
            metals: count("SELECT COUNT(*) FROM materials WHERE band_gap = 0.0")?,
        })
    }

    /// Run one statement that SQLite itself reports as read-only and return
    /// every row. Callers are expected to have passed the text through
    /// `llm::guard::validate_select` first.
    pub fn run_select(&self, sql: &str) -> Result<QueryRows> {
        let mut stmt = self.conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(MaterialsError::UnsafeSql(
                "statement would modify the database".into(),
            ));
        }
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(json_cell(row.get_ref(i)?));
            }
            rows.push(values);
        }
        Ok(QueryRows { columns, rows })
    }

    fn grouped_counts(&self, sql: &str) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |r| {
                let key: Option<String> = r.get(0)?;
                Ok((key.unwrap_or_else(|| "Unknown".to_string()), r.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn column_stats(&self, column: &str) -> Result<Option<ColumnStats>> {
        let sql = format!(
            "SELECT MIN({column}), MAX({column}), AVG({column}) FROM materials WHERE {column} IS NOT NULL"
        );
        let (min, max, avg): (Option<f64>, Option<f64>, Option<f64>) =
            self.conn
                .query_row(&sql, [], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        Ok(match (min, max, avg) {
            (Some(min), Some(max), Some(avg)) => Some(ColumnStats { min, max, avg }),
            _ => None,
        })
    }
}

fn material_from_row(r: &Row<'_>) -> rusqlite::Result<MaterialRow> {
    let collected_at: Option<String> = r.get(25)?;
    Ok(MaterialRow {
        material_id: r.get(0)?,
        formula_pretty: r.get(1)?,
        formula_anonymous: r.get(2)?,
        chemsys: r.get(3)?,
        crystal_system: r.get(4)?,
        space_group: r.get(5)?,
        point_group: r.get(6)?,
        volume: r.get(7)?,
        density: r.get(8)?,
        nsites: r.get(9)?,
        elements: r.get(10)?,
        nelements: r.get(11)?,
        energy_per_atom: r.get(12)?,
        formation_energy_per_atom: r.get(13)?,
        energy_above_hull: r.get(14)?,
        is_stable: r.get(15)?,
        theoretical: r.get(16)?,
        band_gap: r.get(17)?,
        cbm: r.get(18)?,
        vbm: r.get(19)?,
        is_gap_direct: r.get(20)?,
        structure_volume: r.get(21)?,
        structure_num_sites: r.get(22)?,
        structure_formula: r.get(23)?,
        query_type: r.get(24)?,
        collected_at: collected_at
            .and_then(|s| NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).ok()),
    })
}

fn json_cell(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Column names plus rows of JSON cells, in result order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<serde_json::Map<String, Value>>();
                Value::Object(object)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_materials: i64,
    pub crystal_systems: i64,
    /// Band gap between 0.1 and 3.0 eV inclusive.
    pub semiconductors: i64,
    pub metals: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub total_materials: i64,
    pub total_properties: i64,
    pub by_crystal_system: Vec<(String, i64)>,
    pub by_query_type: Vec<(String, i64)>,
    pub semiconductors: i64,
    pub metals: i64,
    pub insulators: i64,
    pub stable: i64,
    pub band_gap: Option<ColumnStats>,
    pub formation_energy: Option<ColumnStats>,
    pub element_distribution: Vec<(i64, i64)>,
    pub top_formulas: Vec<(String, i64)>,
    pub samples: Vec<MaterialRow>,
}

/// Label for a material with `n` distinct elements.
pub fn composition_label(n: i64) -> String {
    match n {
        1 => "Elemental".to_string(),
        2 => "Binary".to_string(),
        3 => "Ternary".to_string(),
        4 => "Quaternary".to_string(),
        n => format!("{n}-component"),
    }
}
