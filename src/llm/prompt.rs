use crate::storage::MATERIALS_DDL;
use crate::types::MaterialRow;

/// Sample rows included in the prompt at most.
pub const MAX_SAMPLE_ROWS: usize = 45;

const INSERT_COLUMNS: &str = "material_id, formula_pretty, formula_anonymous, chemsys, \
crystal_system, space_group, point_group, volume, density, nsites, elements, nelements, \
energy_per_atom, formation_energy_per_atom, energy_above_hull, is_stable, theoretical, \
band_gap, cbm, vbm, is_gap_direct, structure_volume, structure_num_sites, structure_formula, \
query_type, collected_at";

fn text_literal(value: Option<&str>) -> String {
    match value {
        Some(s) => format!("'{}'", s.replace('\'', "''")),
        None => "NULL".to_string(),
    }
}

fn number_literal<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string())
}

fn bool_literal(value: Option<bool>) -> String {
    number_literal(value.map(u8::from))
}

/// One sample row as an `INSERT` statement.
pub fn insert_statement(row: &MaterialRow) -> String {
    let collected_at = row
        .collected_at
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string());
    let values = [
        text_literal(Some(row.material_id.as_str())),
        text_literal(row.formula_pretty.as_deref()),
        text_literal(row.formula_anonymous.as_deref()),
        text_literal(row.chemsys.as_deref()),
        text_literal(row.crystal_system.as_deref()),
        text_literal(row.space_group.as_deref()),
        text_literal(row.point_group.as_deref()),
        number_literal(row.volume),
        number_literal(row.density),
        number_literal(row.nsites),
        text_literal(row.elements.as_deref()),
        number_literal(row.nelements),
        number_literal(row.energy_per_atom),
        number_literal(row.formation_energy_per_atom),
        number_literal(row.energy_above_hull),
        bool_literal(row.is_stable),
        bool_literal(row.theoretical),
        number_literal(row.band_gap),
        number_literal(row.cbm),
        number_literal(row.vbm),
        bool_literal(row.is_gap_direct),
        number_literal(row.structure_volume),
        number_literal(row.structure_num_sites),
        text_literal(row.structure_formula.as_deref()),
        text_literal(row.query_type.as_deref()),
        text_literal(collected_at.as_deref()),
    ];
    format!(
        "INSERT INTO materials ({}) VALUES ({});",
        INSERT_COLUMNS,
        values.join(", ")
    )
}

/// Instructions, schema, sample data and the user's question.
pub fn build_prompt(question: &str, samples: &[MaterialRow]) -> String {
    let mut prompt = String::from("You are an expert SQL generator.\n\nDatabase schema:\n");
    prompt.push_str(MATERIALS_DDL);
    prompt.push_str("\n\n");

    if !samples.is_empty() {
        prompt.push_str("Sample data:\n");
        for row in samples.iter().take(MAX_SAMPLE_ROWS) {
            prompt.push_str(&insert_statement(row));
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str("User request (in English):\n");
    prompt.push_str(question);
    prompt.push_str(
        "\n\nTask:\n\
         1. Generate a single SELECT query that answers the user's request.\n\
         2. Do NOT use DROP/DELETE/UPDATE/INSERT.\n\
         3. Return ONLY the SQL code, no explanation.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_statement_quotes_and_nulls() {
        let row = MaterialRow {
            material_id: "mp-1".into(),
            formula_pretty: Some("O'Brien".into()),
            band_gap: Some(0.611),
            is_stable: Some(true),
            ..MaterialRow::default()
        };
        let stmt = insert_statement(&row);
        assert!(stmt.starts_with("INSERT INTO materials (material_id, formula_pretty"));
        assert!(stmt.contains("'mp-1', 'O''Brien', NULL"));
        assert!(stmt.contains("0.611"));
        assert!(stmt.ends_with(");"));
    }

    #[test]
    fn prompt_contains_schema_question_and_capped_samples() {
        let samples: Vec<MaterialRow> = (0..60)
            .map(|i| MaterialRow {
                material_id: format!("mp-{i}"),
                ..MaterialRow::default()
            })
            .collect();
        let prompt = build_prompt("Which materials are stable?", &samples);
        assert!(prompt.contains("CREATE TABLE IF NOT EXISTS materials"));
        assert!(prompt.contains("Which materials are stable?"));
        assert_eq!(prompt.matches("INSERT INTO materials (").count(), MAX_SAMPLE_ROWS);
    }

    #[test]
    fn prompt_without_samples_has_no_sample_section() {
        let prompt = build_prompt("count materials", &[]);
        assert!(!prompt.contains("Sample data:"));
        assert!(prompt.contains("Return ONLY the SQL code"));
    }
}
