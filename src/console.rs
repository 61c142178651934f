//! Read-only SQL over the materials store: ad-hoc SELECTs and a catalog of
//! named analytical queries.

use crate::error::{MaterialsError, Result};
use crate::llm::guard::validate_select;
use crate::storage::{MaterialStore, QueryRows};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct NamedQuery {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub sql: &'static str,
}

/// Analytical queries, grouped A (aggregates), B (filters and subqueries),
/// C (correlated and window queries) and D (element and outlier analysis).
pub const CATALOG: &[NamedQuery] = &[
    NamedQuery {
        id: "A1",
        title: "Crystal System Analysis",
        description: "Average band gap and formation energy for each crystal system",
        sql: "SELECT crystal_system,
                COUNT(*) AS material_count,
                ROUND(AVG(band_gap), 3) AS avg_band_gap_eV,
                ROUND(AVG(formation_energy_per_atom), 3) AS avg_formation_energy_eV_per_atom
            FROM materials
            WHERE crystal_system IS NOT NULL
                AND band_gap IS NOT NULL
                AND formation_energy_per_atom IS NOT NULL
            GROUP BY crystal_system
            ORDER BY material_count DESC",
    },
    NamedQuery {
        id: "A2",
        title: "Large Crystal Systems",
        description: "Crystal systems with more than 5 materials",
        sql: "SELECT crystal_system,
                COUNT(*) AS material_count,
                ROUND(AVG(band_gap), 3) AS avg_band_gap
            FROM materials
            WHERE crystal_system IS NOT NULL
            GROUP BY crystal_system
            HAVING COUNT(*) > 5
            ORDER BY material_count DESC",
    },
    NamedQuery {
        id: "A3",
        title: "Stability by Composition",
        description: "Comparison of materials by number of elements",
        sql: "SELECT nelements,
                COUNT(*) AS material_count,
                ROUND(MIN(formation_energy_per_atom), 3) AS most_stable_formation_energy,
                ROUND(AVG(formation_energy_per_atom), 3) AS avg_formation_energy,
                COUNT(CASE WHEN is_stable = 1 THEN 1 END) AS stable_materials_count
            FROM materials
            WHERE nelements BETWEEN 1 AND 6
                AND formation_energy_per_atom IS NOT NULL
            GROUP BY nelements
            ORDER BY nelements",
    },
    NamedQuery {
        id: "A4",
        title: "Tellurium Materials",
        description: "Materials containing Tellurium (Te)",
        sql: "SELECT material_id, formula_pretty, elements, band_gap, crystal_system,
                formation_energy_per_atom
            FROM materials
            WHERE instr(',' || elements || ',', ',Te,') > 0
                AND band_gap IS NOT NULL
            ORDER BY band_gap DESC",
    },
    NamedQuery {
        id: "B1",
        title: "Above Average Band Gap",
        description: "Materials with band gaps greater than database average",
        sql: "SELECT m.material_id, m.formula_pretty, m.band_gap, m.crystal_system,
                m.formation_energy_per_atom
            FROM materials m
            WHERE m.band_gap > (SELECT AVG(band_gap) FROM materials WHERE band_gap IS NOT NULL)
                AND m.band_gap IS NOT NULL
            ORDER BY m.band_gap DESC",
    },
    NamedQuery {
        id: "B2",
        title: "Sb+Te Materials",
        description: "Materials containing both Antimony (Sb) and Tellurium (Te)",
        sql: "SELECT material_id, formula_pretty, elements, band_gap,
                formation_energy_per_atom, crystal_system
            FROM materials
            WHERE instr(',' || elements || ',', ',Sb,') > 0
                AND instr(',' || elements || ',', ',Te,') > 0
            ORDER BY band_gap DESC",
    },
    NamedQuery {
        id: "B3",
        title: "Wide Gap Non-Oxides",
        description: "Wide band gap materials (>3.0 eV) without Oxygen",
        sql: "SELECT material_id, formula_pretty, elements, band_gap,
                formation_energy_per_atom, crystal_system
            FROM materials
            WHERE band_gap > 3.0
                AND (elements IS NULL OR instr(',' || elements || ',', ',O,') = 0)
            ORDER BY band_gap DESC",
    },
    NamedQuery {
        id: "B4",
        title: "Most Stable 10%",
        description: "Top 10% most stable materials by formation energy within each crystal system",
        sql: "WITH ranked AS (
                SELECT material_id, formula_pretty, crystal_system, formation_energy_per_atom,
                    band_gap, is_stable,
                    COUNT(*) OVER (PARTITION BY crystal_system) AS total_materials_in_system,
                    ROW_NUMBER() OVER (
                        PARTITION BY crystal_system ORDER BY formation_energy_per_atom
                    ) AS rn
                FROM materials
                WHERE crystal_system IS NOT NULL AND formation_energy_per_atom IS NOT NULL
            ),
            bottom AS (
                SELECT *, MAX(1, (total_materials_in_system + 9) / 10) AS bottom_10_count
                FROM ranked
            ),
            p10_values AS (
                SELECT crystal_system, ROUND(MAX(formation_energy_per_atom), 3) AS p10_formation_energy
                FROM bottom
                WHERE rn <= bottom_10_count
                GROUP BY crystal_system
            )
            SELECT b.material_id, b.formula_pretty, b.crystal_system, b.formation_energy_per_atom,
                p.p10_formation_energy AS system_10th_percentile, b.band_gap, b.is_stable,
                b.total_materials_in_system
            FROM bottom b
            JOIN p10_values p ON b.crystal_system = p.crystal_system
            WHERE b.total_materials_in_system >= 3 AND b.rn <= b.bottom_10_count
            ORDER BY b.crystal_system, b.formation_energy_per_atom",
    },
    NamedQuery {
        id: "C1",
        title: "Most Stable per System",
        description: "Most thermodynamically stable material in each crystal system",
        sql: "SELECT m.crystal_system, m.material_id, m.formula_pretty,
                m.formation_energy_per_atom, m.band_gap
            FROM materials m
            WHERE m.formation_energy_per_atom = (
                SELECT MIN(formation_energy_per_atom)
                FROM materials m2
                WHERE m2.crystal_system = m.crystal_system
                    AND m2.formation_energy_per_atom IS NOT NULL
            )
            AND m.crystal_system IS NOT NULL
            ORDER BY m.formation_energy_per_atom",
    },
    NamedQuery {
        id: "C2",
        title: "Band Gap vs System Average",
        description: "Band gap of each material against its crystal system average",
        sql: "WITH stats AS (
                SELECT material_id, formula_pretty, crystal_system, band_gap,
                    formation_energy_per_atom, is_stable,
                    AVG(band_gap) OVER (PARTITION BY crystal_system) AS system_avg,
                    AVG(band_gap * band_gap) OVER (PARTITION BY crystal_system)
                        - AVG(band_gap) OVER (PARTITION BY crystal_system)
                        * AVG(band_gap) OVER (PARTITION BY crystal_system) AS system_var
                FROM materials
                WHERE crystal_system IS NOT NULL AND band_gap IS NOT NULL
            )
            SELECT material_id, formula_pretty, crystal_system,
                band_gap AS material_band_gap,
                ROUND(system_avg, 3) AS system_avg_band_gap,
                ROUND(band_gap - system_avg, 3) AS difference_from_system_avg,
                CASE
                    WHEN band_gap > system_avg
                        AND (band_gap - system_avg) * (band_gap - system_avg) > system_var
                        THEN 'High outlier'
                    WHEN band_gap > system_avg THEN 'Above average'
                    WHEN band_gap < system_avg
                        AND (band_gap - system_avg) * (band_gap - system_avg) > system_var
                        THEN 'Low outlier'
                    ELSE 'Below average'
                END AS band_gap_category,
                formation_energy_per_atom, is_stable
            FROM stats
            ORDER BY crystal_system, ABS(band_gap - system_avg) DESC",
    },
    NamedQuery {
        id: "C3",
        title: "5th Period Elements",
        description: "Materials containing at least one element from the 5th period",
        sql: "WITH RECURSIVE split(material_id, element, rest) AS (
                SELECT material_id, '', elements || ',' FROM materials WHERE elements IS NOT NULL
                UNION ALL
                SELECT material_id, TRIM(substr(rest, 1, instr(rest, ',') - 1)),
                    substr(rest, instr(rest, ',') + 1)
                FROM split WHERE rest <> ''
            ),
            fifth_period AS (
                SELECT DISTINCT material_id FROM split
                WHERE element IN ('Rb', 'Sr', 'Y', 'Zr', 'Nb', 'Mo', 'Tc', 'Ru', 'Rh', 'Pd',
                                  'Ag', 'Cd', 'In', 'Sn', 'Sb', 'Te', 'I', 'Xe')
            )
            SELECT material_id, formula_pretty, elements, band_gap, crystal_system,
                formation_energy_per_atom, is_stable,
                ROW_NUMBER() OVER (ORDER BY band_gap DESC) AS band_gap_rank,
                DENSE_RANK() OVER (ORDER BY band_gap DESC) AS band_gap_dense_rank,
                NTILE(4) OVER (ORDER BY band_gap DESC) AS band_gap_quartile
            FROM materials
            WHERE material_id IN (SELECT material_id FROM fifth_period)
                AND band_gap IS NOT NULL
            ORDER BY band_gap DESC",
    },
    NamedQuery {
        id: "C4",
        title: "Density Moving Average",
        description: "Density with 5-point and 3-point moving averages ordered by formation energy",
        sql: "SELECT material_id, formula_pretty, formation_energy_per_atom, density,
                ROUND(AVG(density) OVER (
                    ORDER BY formation_energy_per_atom ROWS BETWEEN 2 PRECEDING AND 2 FOLLOWING
                ), 3) AS moving_avg_density_5pt,
                ROUND(AVG(density) OVER (
                    ORDER BY formation_energy_per_atom ROWS BETWEEN 1 PRECEDING AND 1 FOLLOWING
                ), 3) AS moving_avg_density_3pt,
                ROW_NUMBER() OVER (ORDER BY formation_energy_per_atom) AS energy_rank,
                crystal_system, band_gap
            FROM materials
            WHERE formation_energy_per_atom IS NOT NULL AND density IS NOT NULL
            ORDER BY formation_energy_per_atom",
    },
    NamedQuery {
        id: "D1",
        title: "Element Frequency",
        description: "Frequency of each element in the materials database",
        sql: "WITH RECURSIVE split(material_id, element, rest) AS (
                SELECT material_id, '', elements || ',' FROM materials WHERE elements IS NOT NULL
                UNION ALL
                SELECT material_id, TRIM(substr(rest, 1, instr(rest, ',') - 1)),
                    substr(rest, instr(rest, ',') + 1)
                FROM split WHERE rest <> ''
            )
            SELECT element, COUNT(*) AS material_count
            FROM split
            WHERE element <> ''
            GROUP BY element
            ORDER BY material_count DESC, element",
    },
    NamedQuery {
        id: "D2",
        title: "Binary Materials Summary",
        description: "Counts and averages over materials with exactly two elements",
        sql: "SELECT COUNT(DISTINCT elements) AS unique_binary_pairs,
                COUNT(*) AS total_binary_materials,
                ROUND(AVG(band_gap), 3) AS avg_band_gap_binary,
                ROUND(AVG(formation_energy_per_atom), 3) AS avg_formation_energy_binary,
                COUNT(CASE WHEN is_stable = 1 THEN 1 END) AS stable_binary_count
            FROM materials
            WHERE nelements = 2 AND elements IS NOT NULL",
    },
    NamedQuery {
        id: "D3",
        title: "Hexagonal Semiconductors",
        description: "Stable semiconductors in hexagonal crystal system",
        sql: "SELECT material_id, formula_pretty, band_gap, formation_energy_per_atom,
                energy_above_hull, elements
            FROM materials
            WHERE crystal_system = 'Hexagonal'
                AND band_gap BETWEEN 0.1 AND 3.0
                AND (formation_energy_per_atom < 0 OR is_stable = 1)
            ORDER BY band_gap",
    },
    NamedQuery {
        id: "D4",
        title: "Band Gap Outliers",
        description: "Materials more than two standard deviations from their crystal system mean",
        sql: "WITH stats AS (
                SELECT material_id, formula_pretty, crystal_system, band_gap,
                    formation_energy_per_atom, is_stable,
                    AVG(band_gap) OVER (PARTITION BY crystal_system) AS system_avg,
                    AVG(band_gap * band_gap) OVER (PARTITION BY crystal_system)
                        - AVG(band_gap) OVER (PARTITION BY crystal_system)
                        * AVG(band_gap) OVER (PARTITION BY crystal_system) AS system_var
                FROM materials
                WHERE crystal_system IS NOT NULL AND band_gap IS NOT NULL
            )
            SELECT material_id, formula_pretty, crystal_system, band_gap,
                ROUND(system_avg, 3) AS system_avg_band_gap,
                ROUND(system_var, 3) AS system_band_gap_variance,
                CASE
                    WHEN (band_gap - system_avg) * (band_gap - system_avg) > 4 * system_var
                        AND band_gap > system_avg THEN 'High outlier'
                    WHEN (band_gap - system_avg) * (band_gap - system_avg) > 4 * system_var
                        THEN 'Low outlier'
                    ELSE 'Normal'
                END AS band_gap_outlier_status,
                formation_energy_per_atom, is_stable
            FROM stats
            ORDER BY crystal_system, band_gap",
    },
    NamedQuery {
        id: "D5",
        title: "Stable Hexagonal Semiconductors",
        description: "Thermodynamically stable semiconductors in hexagonal crystal system",
        sql: "SELECT material_id, formula_pretty, band_gap, formation_energy_per_atom,
                energy_above_hull, space_group, elements, density, volume,
                CASE
                    WHEN band_gap < 1.0 THEN 'Narrow gap'
                    WHEN band_gap < 2.0 THEN 'Medium gap'
                    ELSE 'Wide gap'
                END AS semiconductor_type
            FROM materials
            WHERE crystal_system = 'Hexagonal'
                AND band_gap BETWEEN 0.1 AND 3.0
                AND (formation_energy_per_atom < 0 OR is_stable = 1)
                AND formation_energy_per_atom IS NOT NULL
            ORDER BY band_gap, formation_energy_per_atom",
    },
];

/// Catalog entry by id, ignoring case.
pub fn find(id: &str) -> Option<&'static NamedQuery> {
    CATALOG.iter().find(|q| q.id.eq_ignore_ascii_case(id.trim()))
}

/// Rows of one query plus how long it took.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub result: QueryRows,
    pub execution_ms: f64,
}

/// Validate `sql` as a single read-only statement, then run it.
#[instrument(skip(store, sql))]
pub fn execute(store: &MaterialStore, sql: &str) -> Result<QueryOutcome> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(MaterialsError::UnsafeSql("no SQL query provided".into()));
    }
    validate_select(sql)?;

    let started = Instant::now();
    let result = store.run_select(sql.trim_end_matches(';').trim_end())?;
    let execution_ms = (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;
    info!(rows = result.rows.len(), execution_ms, "Query executed");
    Ok(QueryOutcome { result, execution_ms })
}

/// Run a catalog query by id.
pub fn execute_named(store: &MaterialStore, id: &str) -> Result<(&'static NamedQuery, QueryOutcome)> {
    let query = find(id).ok_or_else(|| MaterialsError::Config(format!("Query '{}' not found", id)))?;
    let outcome = execute(store, query.sql)?;
    Ok((query, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MaterialRow;
    use serde_json::Value;

    fn material(id: &str, system: &str, elements: &str, band_gap: f64, formation: f64) -> MaterialRow {
        MaterialRow {
            material_id: id.to_string(),
            formula_pretty: Some(id.to_uppercase()),
            crystal_system: Some(system.to_string()),
            elements: Some(elements.to_string()),
            nelements: Some(elements.split(',').count() as i64),
            band_gap: Some(band_gap),
            formation_energy_per_atom: Some(formation),
            density: Some(4.0),
            is_stable: Some(true),
            ..MaterialRow::default()
        }
    }

    fn seeded_store() -> MaterialStore {
        let mut store = MaterialStore::open_in_memory().unwrap();
        let conn = store.connection_mut();
        for row in [
            material("mp-1", "Hexagonal", "Ga,N", 1.7, -0.6),
            material("mp-2", "Hexagonal", "Sb,Te", 0.3, -0.2),
            material("mp-3", "Cubic", "O,Ti", 3.2, -3.3),
            material("mp-4", "Cubic", "Si", 0.6, 0.0),
            material("mp-5", "Cubic", "Cd,Te", 1.5, -0.4),
        ] {
            MaterialStore::upsert_material(conn, &row).unwrap();
        }
        store
    }

    #[test]
    fn catalog_ids_are_unique_and_every_query_is_accepted() {
        let mut ids: Vec<&str> = CATALOG.iter().map(|q| q.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), CATALOG.len());
        for query in CATALOG {
            validate_select(query.sql).unwrap_or_else(|e| panic!("{}: {}", query.id, e));
        }
    }

    #[test]
    fn every_catalog_query_runs() {
        let empty = MaterialStore::open_in_memory().unwrap();
        let seeded = seeded_store();
        for query in CATALOG {
            execute(&empty, query.sql).unwrap_or_else(|e| panic!("{} on empty store: {}", query.id, e));
            execute(&seeded, query.sql).unwrap_or_else(|e| panic!("{} on seeded store: {}", query.id, e));
        }
    }

    #[test]
    fn element_queries_match_whole_symbols() {
        let store = seeded_store();
        let (_, tellurides) = execute_named(&store, "a4").unwrap();
        let ids: Vec<&Value> = tellurides.result.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(ids, vec![&Value::from("mp-5"), &Value::from("mp-2")]);

        let (_, frequency) = execute_named(&store, "D1").unwrap();
        let records = frequency.result.to_records();
        assert_eq!(records[0]["element"], "Te");
        assert_eq!(records[0]["material_count"], 2);
        assert_eq!(records.len(), 8);

        let (_, non_oxides) = execute_named(&store, "B3").unwrap();
        assert!(non_oxides.result.rows.is_empty());
    }

    #[test]
    fn hexagonal_semiconductors_are_classified() {
        let store = seeded_store();
        let (query, outcome) = execute_named(&store, "D5").unwrap();
        assert_eq!(query.title, "Stable Hexagonal Semiconductors");
        let records = outcome.result.to_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["semiconductor_type"], "Narrow gap");
        assert_eq!(records[1]["semiconductor_type"], "Medium gap");
    }

    #[test]
    fn ad_hoc_queries_are_guarded() {
        let store = seeded_store();
        let outcome = execute(&store, "SELECT COUNT(*) AS n FROM materials WHERE query_type = 'update'").unwrap();
        assert_eq!(outcome.result.rows, vec![vec![Value::from(0)]]);

        assert!(matches!(execute(&store, "DELETE FROM materials"), Err(MaterialsError::UnsafeSql(_))));
        assert!(matches!(execute(&store, "   "), Err(MaterialsError::UnsafeSql(_))));
        assert!(execute_named(&store, "Z9").is_err());
        assert_eq!(store.count_materials().unwrap(), 5);
    }
}
