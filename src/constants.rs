/// Materials Project endpoints and defaults
pub const MP_API_BASE_URL: &str = "https://api.materialsproject.org";
pub const SUMMARY_ENDPOINT: &str = "/materials/summary/";
pub const ELECTRONIC_STRUCTURE_ENDPOINT: &str = "/materials/electronic_structure/";
pub const API_KEY_HEADER: &str = "X-API-Key";

pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_DATABASE_PATH: &str = "materials.db";
pub const DEFAULT_OUTPUT_DIR: &str = "mp_data";
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.5-flash";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Provenance tags written to `query_type`
pub const PROVENANCE_SPECIFIC_IDS: &str = "specific_ids";
pub const PROVENANCE_SEMICONDUCTORS: &str = "semiconductors";
pub const PROVENANCE_STABLE: &str = "stable_materials";

pub fn elements_provenance(elements: &[String]) -> String {
    format!("elements_{}", elements.join("-"))
}

/// Output file prefixes
pub const PREFIX_SPECIFIC: &str = "specific_materials";
pub const PREFIX_SEMICONDUCTORS: &str = "semiconductors";
pub const PREFIX_STABLE: &str = "stable_materials";
pub const PREFIX_COMPREHENSIVE: &str = "comprehensive_dataset";

/// Auxiliary property groups and their source categories
pub const SOURCE_ELECTRONIC_STRUCTURE: &str = "electronic_structure";
pub const SOURCE_MAGNETISM: &str = "magnetism";
pub const PROPERTY_SOURCES: [&str; 2] = [SOURCE_ELECTRONIC_STRUCTURE, SOURCE_MAGNETISM];

/// Well-known reference materials queried by default
pub const IMPORTANT_MATERIALS: [&str; 10] = [
    "mp-149",   // Si
    "mp-13",    // Fe
    "mp-22526", // LiCoO2
    "mp-1143",  // Al2O3
    "mp-390",   // TiO2
    "mp-2534",  // GaAs
    "mp-804",   // GaN
    "mp-1265",  // MgO
    "mp-571",   // TiNi
    "mp-1000",  // BaTe
];

pub const DEFAULT_ELEMENT_LIMIT: usize = 15;
pub const DEFAULT_SEMICONDUCTOR_LIMIT: usize = 20;
pub const DEFAULT_STABLE_LIMIT: usize = 100;
pub const DEFAULT_BAND_GAP_RANGE: (f64, f64) = (1.0, 3.0);
pub const DEFAULT_E_HULL_MAX: f64 = 0.1;
pub const MAX_ADDITIONAL_PROPERTY_MATERIALS: usize = 5;

/// Field lists requested from the summary endpoint, per query
pub const SPECIFIC_FIELDS: &[&str] = &[
    "material_id",
    "formula_pretty",
    "formula_anonymous",
    "symmetry",
    "volume",
    "density",
    "nsites",
    "elements",
    "structure",
    "band_gap",
    "formation_energy_per_atom",
    "energy_above_hull",
    "is_stable",
    "theoretical",
    "energy_per_atom",
    "chemsys",
    "cbm",
    "vbm",
    "is_gap_direct",
];

pub const ELEMENT_FIELDS: &[&str] = &[
    "material_id",
    "formula_pretty",
    "symmetry",
    "volume",
    "density",
    "nsites",
    "elements",
    "band_gap",
    "formation_energy_per_atom",
    "energy_above_hull",
    "is_stable",
];

pub const SEMICONDUCTOR_FIELDS: &[&str] = &[
    "material_id",
    "formula_pretty",
    "symmetry",
    "elements",
    "band_gap",
    "formation_energy_per_atom",
    "energy_above_hull",
    "is_stable",
    "theoretical",
    "is_gap_direct",
    "cbm",
    "vbm",
];

pub const STABLE_FIELDS: &[&str] = &[
    "material_id",
    "formula_pretty",
    "symmetry",
    "elements",
    "formation_energy_per_atom",
    "energy_above_hull",
    "is_stable",
    "band_gap",
];

pub const ELECTRONIC_STRUCTURE_FIELDS: &[&str] =
    &["material_id", "band_gap", "cbm", "vbm", "is_gap_direct"];

pub const PING_FIELDS: &[&str] = &["material_id", "formula_pretty"];
pub const PING_MATERIAL: &str = "mp-149";
