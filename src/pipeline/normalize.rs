use crate::metrics::names::{FIELD_DEGRADED_TOTAL, RECORDS_NORMALIZED_TOTAL};
use crate::types::{FlatRow, NormalizedRecord, SourceRecord, FLAT_COLUMNS};
use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

/// Symmetry block of a summary document.
#[derive(Debug, Default, Deserialize)]
struct Symmetry {
    crystal_system: Option<String>,
    symbol: Option<String>,
    space_group: Option<Value>,
    point_group: Option<String>,
}

/// The three scalars kept from a structure object.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StructureSummary {
    pub volume: Option<f64>,
    pub num_sites: Option<i64>,
    pub reduced_formula: Option<String>,
}

/// Typed field access over a source document. A present value of the wrong
/// type degrades to `None` with a warning.
struct FieldReader<'a> {
    doc: Option<&'a Map<String, Value>>,
    label: String,
}

impl<'a> FieldReader<'a> {
    fn new(source: &'a SourceRecord) -> Self {
        let doc = source.as_object();
        if doc.is_none() {
            warn!("Source record is not an object; every field will be null");
        }
        let label = doc
            .and_then(|d| d.get("material_id"))
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        Self { doc, label }
    }

    fn raw(&self, key: &str) -> Option<&'a Value> {
        match self.doc?.get(key) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    fn degrade(&self, key: &str, value: &Value, expected: &str) {
        warn!(
            material_id = %self.label,
            field = key,
            "Could not extract {} (expected {}, got {}); using null",
            key,
            expected,
            value
        );
        counter!(FIELD_DEGRADED_TOTAL, "field" => key.to_string()).increment(1);
    }

    fn string(&self, key: &str) -> Option<String> {
        let value = self.raw(key)?;
        match value.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                self.degrade(key, value, "string");
                None
            }
        }
    }

    fn float(&self, key: &str) -> Option<f64> {
        let value = self.raw(key)?;
        match value.as_f64() {
            Some(f) if f.is_finite() => Some(f),
            _ => {
                self.degrade(key, value, "number");
                None
            }
        }
    }

    fn int(&self, key: &str) -> Option<i64> {
        let value = self.raw(key)?;
        let parsed = value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        });
        if parsed.is_none() {
            self.degrade(key, value, "integer");
        }
        parsed
    }

    fn boolean(&self, key: &str) -> Option<bool> {
        let value = self.raw(key)?;
        match value.as_bool() {
            Some(b) => Some(b),
            None => {
                self.degrade(key, value, "boolean");
                None
            }
        }
    }
}

/// Normalize one source document, stamping `collected_at` with the current
/// time.
pub fn normalize(source: &SourceRecord, provenance: &str) -> NormalizedRecord {
    normalize_at(source, provenance, Utc::now())
}

/// Normalize one source document with an explicit collection timestamp.
/// Never fails: unreadable fields become null.
pub fn normalize_at(
    source: &SourceRecord,
    provenance: &str,
    collected_at: DateTime<Utc>,
) -> NormalizedRecord {
    let reader = FieldReader::new(source);

    let (crystal_system, space_group, point_group) = match reader.raw("symmetry") {
        Some(symmetry) => flatten_symmetry(&reader, symmetry),
        None => (None, None, None),
    };

    let structure = match reader.raw("structure") {
        Some(structure) => summarize_structure(structure).unwrap_or_else(|| {
            reader.degrade("structure", structure, "structure object");
            StructureSummary::default()
        }),
        None => StructureSummary::default(),
    };

    let elements = reader.raw("elements").map(element_symbols).unwrap_or_default();

    if reader.raw("material_id").is_none() {
        warn!("Source record has no material_id; keeping it with a null identifier");
    }

    let record = NormalizedRecord {
        material_id: reader.string("material_id"),
        formula_pretty: reader.string("formula_pretty"),
        formula_anonymous: reader.string("formula_anonymous"),
        chemsys: reader.string("chemsys"),
        volume: reader.float("volume"),
        density: reader.float("density"),
        nsites: reader.int("nsites"),
        elements,
        band_gap: reader.float("band_gap"),
        formation_energy_per_atom: reader.float("formation_energy_per_atom"),
        energy_above_hull: reader.float("energy_above_hull"),
        energy_per_atom: reader.float("energy_per_atom"),
        is_stable: reader.boolean("is_stable"),
        theoretical: reader.boolean("theoretical"),
        cbm: reader.float("cbm"),
        vbm: reader.float("vbm"),
        is_gap_direct: reader.boolean("is_gap_direct"),
        collected_at: collected_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        query_type: provenance.to_string(),
        crystal_system,
        space_group,
        point_group,
        structure_volume: structure.volume,
        structure_num_sites: structure.num_sites,
        structure_formula: structure.reduced_formula,
        properties: Map::new(),
    };

    counter!(RECORDS_NORMALIZED_TOTAL, "query_type" => provenance.to_string()).increment(1);
    debug!(material_id = ?record.material_id, "Normalized record");
    record
}

fn flatten_symmetry(
    reader: &FieldReader<'_>,
    symmetry: &Value,
) -> (Option<String>, Option<String>, Option<String>) {
    match Symmetry::deserialize(symmetry) {
        Ok(sym) => {
            let space_group = sym.symbol.or_else(|| match sym.space_group {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
            });
            (sym.crystal_system, space_group, sym.point_group)
        }
        Err(e) => {
            reader.degrade("symmetry", symmetry, &format!("symmetry object ({e})"));
            (None, None, None)
        }
    }
}

/// Render a collection of element identifiers as plain symbols. Strings are
/// kept (trimmed), objects with a `symbol` use it, anything else uses its JSON
/// text with commas swapped for semicolons so the comma-joined form splits
/// back into the same items. Null and blank items are dropped.
/// A lone non-array value is treated as a one-item collection.
pub fn element_symbols(items: &Value) -> Vec<String> {
    let list = match items {
        Value::Null => return Vec::new(),
        Value::Array(list) => list.as_slice(),
        single => std::slice::from_ref(single),
    };
    list.iter()
        .filter_map(element_symbol)
        .filter(|s| !s.is_empty())
        .collect()
}

fn element_symbol(item: &Value) -> Option<String> {
    let text = match item {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Object(obj) => match obj.get("symbol").and_then(Value::as_str) {
            Some(symbol) => symbol.trim().to_string(),
            None => item.to_string(),
        },
        other => other.to_string(),
    };
    Some(text.replace(',', ";"))
}

/// Reduce a structure object to volume, site count and reduced formula.
/// Returns `None` when the value is not an object.
pub fn summarize_structure(structure: &Value) -> Option<StructureSummary> {
    let obj = structure.as_object()?;

    let volume = obj
        .get("lattice")
        .and_then(|l| l.get("volume"))
        .or_else(|| obj.get("volume"))
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite());

    let sites = obj.get("sites").and_then(Value::as_array);
    let num_sites = sites.map(|s| s.len() as i64);
    let reduced_formula = sites.and_then(|s| reduced_formula(s));

    Some(StructureSummary {
        volume,
        num_sites,
        reduced_formula,
    })
}

/// Pauling electronegativities; the reduced formula lists elements in
/// ascending order of these. Elements missing here (noble gases He, Ne, Ar and
/// anything heavier than Pu) sort last.
const ELECTRONEGATIVITY: &[(&str, f64)] = &[
    ("H", 2.20), ("Li", 0.98), ("Be", 1.57), ("B", 2.04), ("C", 2.55), ("N", 3.04),
    ("O", 3.44), ("F", 3.98), ("Na", 0.93), ("Mg", 1.31), ("Al", 1.61), ("Si", 1.90),
    ("P", 2.19), ("S", 2.58), ("Cl", 3.16), ("K", 0.82), ("Ca", 1.00), ("Sc", 1.36),
    ("Ti", 1.54), ("V", 1.63), ("Cr", 1.66), ("Mn", 1.55), ("Fe", 1.83), ("Co", 1.88),
    ("Ni", 1.91), ("Cu", 1.90), ("Zn", 1.65), ("Ga", 1.81), ("Ge", 2.01), ("As", 2.18),
    ("Se", 2.55), ("Br", 2.96), ("Kr", 3.00), ("Rb", 0.82), ("Sr", 0.95), ("Y", 1.22),
    ("Zr", 1.33), ("Nb", 1.60), ("Mo", 2.16), ("Tc", 1.90), ("Ru", 2.20), ("Rh", 2.28),
    ("Pd", 2.20), ("Ag", 1.93), ("Cd", 1.69), ("In", 1.78), ("Sn", 1.96), ("Sb", 2.05),
    ("Te", 2.10), ("I", 2.66), ("Xe", 2.60), ("Cs", 0.79), ("Ba", 0.89), ("La", 1.10),
    ("Ce", 1.12), ("Pr", 1.13), ("Nd", 1.14), ("Pm", 1.13), ("Sm", 1.17), ("Eu", 1.20),
    ("Gd", 1.20), ("Tb", 1.10), ("Dy", 1.22), ("Ho", 1.23), ("Er", 1.24), ("Tm", 1.25),
    ("Yb", 1.10), ("Lu", 1.27), ("Hf", 1.30), ("Ta", 1.50), ("W", 2.36), ("Re", 1.90),
    ("Os", 2.20), ("Ir", 2.20), ("Pt", 2.28), ("Au", 2.54), ("Hg", 2.00), ("Tl", 1.62),
    ("Pb", 2.33), ("Bi", 2.02), ("Po", 2.00), ("At", 2.20), ("Rn", 2.20), ("Fr", 0.70),
    ("Ra", 0.90), ("Ac", 1.10), ("Th", 1.30), ("Pa", 1.50), ("U", 1.38), ("Np", 1.36),
    ("Pu", 1.28),
];

fn electronegativity(element: &str) -> f64 {
    ELECTRONEGATIVITY
        .iter()
        .find(|(symbol, _)| *symbol == element)
        .map(|(_, x)| *x)
        .unwrap_or(f64::INFINITY)
}

/// Reduced formula from site species occupancies. Elements are ordered by
/// electronegativity; ties keep their order of first appearance.
fn reduced_formula(sites: &[Value]) -> Option<String> {
    let mut amounts: Vec<(String, f64)> = Vec::new();
    for site in sites {
        let Some(species) = site.get("species").and_then(Value::as_array) else {
            continue;
        };
        for sp in species {
            let Some(element) = sp.get("element").and_then(Value::as_str) else {
                continue;
            };
            let occu = sp.get("occu").and_then(Value::as_f64).unwrap_or(1.0);
            match amounts.iter_mut().find(|(el, _)| el == element) {
                Some((_, total)) => *total += occu,
                None => amounts.push((element.to_string(), occu)),
            }
        }
    }
    if amounts.is_empty() {
        return None;
    }
    amounts.sort_by(|(a, _), (b, _)| electronegativity(a).total_cmp(&electronegativity(b)));

    let integral = amounts.iter().all(|(_, a)| (a - a.round()).abs() < 1e-6 && *a >= 1.0);
    let divisor = if integral {
        amounts
            .iter()
            .map(|(_, a)| a.round() as u64)
            .fold(0, gcd)
            .max(1) as f64
    } else {
        1.0
    };

    let formula = amounts
        .iter()
        .map(|(el, amount)| {
            let n = amount / divisor;
            if (n - 1.0).abs() < 1e-6 {
                el.clone()
            } else if (n - n.round()).abs() < 1e-6 {
                format!("{}{}", el, n.round() as u64)
            } else {
                format!("{}{}", el, n)
            }
        })
        .collect::<String>();
    Some(formula)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Project a record to a flat row: the element list becomes a comma-joined
/// string, non-scalar fields are dropped.
pub fn to_tabular_row(record: &NormalizedRecord) -> FlatRow {
    let mut row = FlatRow::new();
    let full = match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => return row,
    };

    for column in FLAT_COLUMNS {
        let value = full.get(*column).cloned().unwrap_or(Value::Null);
        let value = match (*column, value) {
            ("elements", _) => {
                if record.elements.is_empty() {
                    Value::Null
                } else {
                    Value::String(record.elements.join(","))
                }
            }
            (_, Value::Array(_)) | (_, Value::Object(_)) => continue,
            (_, scalar) => scalar,
        };
        row.insert(column.to_string(), value);
    }
    row
}

/// Split a comma-joined element string back into symbols.
pub fn split_elements(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Encode any serializable value as JSON. Non-finite floats become null;
/// values serde cannot encode (e.g. maps keyed by non-strings) fall back to
/// their `Debug` text.
pub fn json_safe<T>(value: &T) -> Value
where
    T: Serialize + fmt::Debug + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            debug!("Falling back to debug text for JSON output: {}", e);
            Value::String(format!("{value:?}"))
        }
    }
}

impl NormalizedRecord {
    /// Attach an auxiliary property group (JSON output only).
    pub fn attach_properties<T>(&mut self, group: &str, values: &T)
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        self.properties.insert(group.to_string(), json_safe(values));
    }
}
