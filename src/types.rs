use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One document as returned by the materials API. Attributes may be absent,
/// null, or of an unexpected type.
pub type SourceRecord = Value;

/// Tabular projection of a [`NormalizedRecord`]: column name to scalar value,
/// in schema order.
pub type FlatRow = Map<String, Value>;

/// Flattened, schema-conformant representation of one source document.
///
/// Every field is always serialized; absent source attributes become `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub material_id: Option<String>,
    pub formula_pretty: Option<String>,
    pub formula_anonymous: Option<String>,
    pub chemsys: Option<String>,
    pub volume: Option<f64>,
    pub density: Option<f64>,
    pub nsites: Option<i64>,
    pub elements: Vec<String>,
    pub band_gap: Option<f64>,
    pub formation_energy_per_atom: Option<f64>,
    pub energy_above_hull: Option<f64>,
    pub energy_per_atom: Option<f64>,
    pub is_stable: Option<bool>,
    pub theoretical: Option<bool>,
    pub cbm: Option<f64>,
    pub vbm: Option<f64>,
    pub is_gap_direct: Option<bool>,
    /// ISO-8601, assigned when the record is normalized
    pub collected_at: String,
    /// Provenance tag naming the query that produced the record
    pub query_type: String,
    pub crystal_system: Option<String>,
    pub space_group: Option<String>,
    pub point_group: Option<String>,
    pub structure_volume: Option<f64>,
    pub structure_num_sites: Option<i64>,
    pub structure_formula: Option<String>,
    /// Auxiliary property groups (e.g. `electronic_structure`), JSON output only
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Fixed column order of the tabular projection.
pub const FLAT_COLUMNS: &[&str] = &[
    "material_id",
    "formula_pretty",
    "formula_anonymous",
    "chemsys",
    "volume",
    "density",
    "nsites",
    "elements",
    "band_gap",
    "formation_energy_per_atom",
    "energy_above_hull",
    "energy_per_atom",
    "is_stable",
    "theoretical",
    "cbm",
    "vbm",
    "is_gap_direct",
    "collected_at",
    "query_type",
    "crystal_system",
    "space_group",
    "point_group",
    "structure_volume",
    "structure_num_sites",
    "structure_formula",
];

/// Search parameters for the summary endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialQuery {
    pub material_ids: Vec<String>,
    pub elements: Vec<String>,
    pub band_gap: Option<(f64, f64)>,
    pub energy_above_hull: Option<(f64, f64)>,
    pub fields: Vec<String>,
}

impl MaterialQuery {
    pub fn by_ids(ids: &[String]) -> Self {
        Self {
            material_ids: ids.to_vec(),
            ..Self::default()
        }
    }

    pub fn by_elements(elements: &[String]) -> Self {
        Self {
            elements: elements.to_vec(),
            ..Self::default()
        }
    }

    pub fn band_gap_range(min: f64, max: f64) -> Self {
        Self {
            band_gap: Some((min, max)),
            ..Self::default()
        }
    }

    pub fn energy_above_hull_range(min: f64, max: f64) -> Self {
        Self {
            energy_above_hull: Some((min, max)),
            ..Self::default()
        }
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Query-string pairs for the REST endpoint (paging excluded).
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if !self.material_ids.is_empty() {
            pairs.push(("material_ids".to_string(), self.material_ids.join(",")));
        }
        if !self.elements.is_empty() {
            pairs.push(("elements".to_string(), self.elements.join(",")));
        }
        if let Some((min, max)) = self.band_gap {
            pairs.push(("band_gap_min".to_string(), min.to_string()));
            pairs.push(("band_gap_max".to_string(), max.to_string()));
        }
        if let Some((min, max)) = self.energy_above_hull {
            pairs.push(("energy_above_hull_min".to_string(), min.to_string()));
            pairs.push(("energy_above_hull_max".to_string(), max.to_string()));
        }
        if self.fields.is_empty() {
            pairs.push(("_all_fields".to_string(), "true".to_string()));
        } else {
            pairs.push(("_fields".to_string(), self.fields.join(",")));
        }
        pairs
    }
}

/// One row of the `materials` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialRow {
    pub material_id: String,
    pub formula_pretty: Option<String>,
    pub formula_anonymous: Option<String>,
    pub chemsys: Option<String>,
    pub crystal_system: Option<String>,
    pub space_group: Option<String>,
    pub point_group: Option<String>,
    pub volume: Option<f64>,
    pub density: Option<f64>,
    pub nsites: Option<i64>,
    pub elements: Option<String>,
    pub nelements: Option<i64>,
    pub energy_per_atom: Option<f64>,
    pub formation_energy_per_atom: Option<f64>,
    pub energy_above_hull: Option<f64>,
    pub is_stable: Option<bool>,
    pub theoretical: Option<bool>,
    pub band_gap: Option<f64>,
    pub cbm: Option<f64>,
    pub vbm: Option<f64>,
    pub is_gap_direct: Option<bool>,
    pub structure_volume: Option<f64>,
    pub structure_num_sites: Option<i64>,
    pub structure_formula: Option<String>,
    pub query_type: Option<String>,
    pub collected_at: Option<NaiveDateTime>,
}

/// One row of the `material_properties` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRow {
    pub material_id: String,
    pub property_name: String,
    pub property_value: String,
    pub source_type: String,
}

/// Result of writing one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_cover_filters_and_fields() {
        let query = MaterialQuery::band_gap_range(1.0, 3.0).with_fields(&["material_id", "band_gap"]);
        let pairs = query.to_query_pairs();
        assert!(pairs.contains(&("band_gap_min".to_string(), "1".to_string())));
        assert!(pairs.contains(&("band_gap_max".to_string(), "3".to_string())));
        assert!(pairs.contains(&("_fields".to_string(), "material_id,band_gap".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "material_ids"));
    }

    #[test]
    fn query_without_fields_requests_all() {
        let ids = vec!["mp-149".to_string(), "mp-13".to_string()];
        let pairs = MaterialQuery::by_ids(&ids).to_query_pairs();
        assert_eq!(pairs[0], ("material_ids".to_string(), "mp-149,mp-13".to_string()));
        assert!(pairs.contains(&("_all_fields".to_string(), "true".to_string())));
    }
}
