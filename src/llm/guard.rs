use crate::error::{MaterialsError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static MODIFYING_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|REPLACE|TRUNCATE|ATTACH|DETACH|PRAGMA|GRANT|REVOKE)\b",
    )
    .expect("keyword pattern is valid")
});

/// String literals, quoted identifiers and comments. Alternation is
/// leftmost-first, so a quote inside a comment (or the reverse) is consumed
/// by whichever starts first.
static QUOTED_OR_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|--[^\n]*|/\*(?s:.*?)\*/"#)
        .expect("literal pattern is valid")
});

/// `sql` with every literal, quoted identifier and comment blanked out, so
/// later checks only see statement structure.
fn strip_literals(sql: &str) -> String {
    QUOTED_OR_COMMENT.replace_all(sql, " ").into_owned()
}

/// Strip backticks and a leading `sql` language tag from model output.
pub fn clean_sql(raw: &str) -> Result<String> {
    let without_ticks = raw.replace('`', "");
    let trimmed = without_ticks.trim();
    let body = match trimmed.get(..3) {
        Some(tag) if tag.eq_ignore_ascii_case("sql") => &trimmed[3..],
        _ => trimmed,
    };
    let sql = body.trim();
    if sql.is_empty() {
        return Err(MaterialsError::Llm("LLM returned empty text".into()));
    }
    Ok(sql.to_string())
}

/// Accept a single read-only statement. Text inside quotes is ignored, and
/// `REPLACE(...)` is allowed as the string function.
pub fn validate_select(sql: &str) -> Result<()> {
    let stripped = strip_literals(sql);
    let statement = stripped.trim().trim_end_matches(';').trim_end();
    if statement.contains(';') {
        return Err(MaterialsError::UnsafeSql("multiple statements are not allowed".into()));
    }

    let upper = statement.to_ascii_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        let head: String = statement.chars().take(50).collect();
        return Err(MaterialsError::UnsafeSql(format!(
            "only SELECT queries are allowed, got: {}",
            head
        )));
    }

    for m in MODIFYING_KEYWORD.find_iter(statement) {
        let keyword = m.as_str().to_ascii_uppercase();
        if keyword == "REPLACE" && statement[m.end()..].trim_start().starts_with('(') {
            continue;
        }
        return Err(MaterialsError::UnsafeSql(format!(
            "keyword '{}' is not allowed",
            keyword
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_and_language_tag() {
        let raw = "```sql\nSELECT * FROM materials WHERE band_gap > 1;\n```";
        assert_eq!(clean_sql(raw).unwrap(), "SELECT * FROM materials WHERE band_gap > 1;");
        assert_eq!(clean_sql("  SELECT 1 ").unwrap(), "SELECT 1");
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(clean_sql("``` ```").is_err());
        assert!(clean_sql("sql").is_err());
    }

    #[test]
    fn accepts_read_only_queries() {
        validate_select("SELECT formula_pretty FROM materials WHERE is_stable = 1;").unwrap();
        validate_select("with s as (select * from materials) select count(*) from s").unwrap();
        // column names containing keywords are fine
        validate_select("SELECT updated_at, created_at FROM materials").unwrap();
    }

    #[test]
    fn rejects_modifying_or_chained_statements() {
        assert!(validate_select("DELETE FROM materials").is_err());
        assert!(validate_select("SELECT 1; DROP TABLE materials").is_err());
        assert!(validate_select("WITH x AS (DELETE FROM materials RETURNING *) SELECT * FROM x").is_err());
        assert!(validate_select("REPLACE INTO materials (material_id) VALUES ('mp-1')").is_err());
        assert!(validate_select("SELECT 1; INSERT OR REPLACE INTO materials (material_id) VALUES ('x')").is_err());
    }

    #[test]
    fn quoted_text_and_replace_function_are_allowed() {
        validate_select("SELECT REPLACE(formula_pretty, 'O', 'X') FROM materials").unwrap();
        validate_select("SELECT replace (elements, ',', ' ') FROM materials").unwrap();
        validate_select("SELECT * FROM materials WHERE query_type = 'update'").unwrap();
        validate_select("SELECT * FROM materials WHERE formula_pretty = 'a;b';").unwrap();
        validate_select("SELECT 'it''s; DROP TABLE materials' AS note").unwrap();
        validate_select("SELECT \"delete\" FROM t -- drop later").unwrap();
    }

    #[test]
    fn unterminated_literal_does_not_hide_a_second_statement() {
        assert!(validate_select("SELECT 'a; DROP TABLE materials").is_err());
        assert!(validate_select("SELECT '' ; DELETE FROM materials").is_err());
    }
}
