//! Total conversions from loosely typed cells to column types. Every function
//! returns `None` instead of failing.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

const TRUTHY: [&str; 4] = ["true", "1", "yes", "on"];
const FALSY: [&str; 4] = ["false", "0", "no", "off"];

/// Cell texts treated as missing when reading tabular files.
pub const NULL_TOKENS: [&str; 12] = [
    "", "NULL", "null", "None", "NaN", "nan", "N/A", "n/a", "NA", "<NA>", "#N/A", "-nan",
];

pub fn is_null_token(cell: &str) -> bool {
    NULL_TOKENS.contains(&cell.trim())
}

fn text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

pub fn to_float(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(_) => text(value)?.parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Integer via a float intermediate so `"5.0"` is accepted.
pub fn to_int(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    let f = to_float(value)?;
    if f < i64::MIN as f64 || f > i64::MAX as f64 {
        return None;
    }
    Some(f.trunc() as i64)
}

pub fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(_) => {
            let lowered = text(value)?.to_ascii_lowercase();
            if TRUTHY.contains(&lowered.as_str()) {
                Some(true)
            } else if FALSY.contains(&lowered.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Accepts RFC 3339, naive ISO-8601 (`T` or space separated, optional
/// fraction) and bare dates.
pub fn to_datetime(value: &Value) -> Option<NaiveDateTime> {
    let s = text(value)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Non-empty text, or `None`. Numbers are rendered as text.
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => text(value).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Number of elements in a comma-joined element string.
pub fn count_elements(elements: Option<&str>) -> Option<i64> {
    let count = elements?.split(',').filter(|s| !s.trim().is_empty()).count();
    if count == 0 {
        None
    } else {
        Some(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bad_inputs() -> Vec<Value> {
        vec![json!(""), json!("NULL"), json!("abc"), Value::Null]
    }

    #[test]
    fn every_rule_returns_none_on_bad_input() {
        for input in bad_inputs() {
            assert_eq!(to_float(&input), None, "float {input}");
            assert_eq!(to_int(&input), None, "int {input}");
            assert_eq!(to_bool(&input), None, "bool {input}");
            assert_eq!(to_datetime(&input), None, "datetime {input}");
        }
    }

    #[test]
    fn floats_and_ints() {
        assert_eq!(to_float(&json!("0.611")), Some(0.611));
        assert_eq!(to_float(&json!(2)), Some(2.0));
        assert_eq!(to_float(&json!("inf")), None);
        assert_eq!(to_int(&json!("5.0")), Some(5));
        assert_eq!(to_int(&json!(7)), Some(7));
        assert_eq!(to_int(&json!("2.9")), Some(2));
        assert_eq!(to_int(&json!("1e300")), None);
    }

    #[test]
    fn booleans() {
        assert_eq!(to_bool(&json!(true)), Some(true));
        assert_eq!(to_bool(&json!("Yes")), Some(true));
        assert_eq!(to_bool(&json!("ON")), Some(true));
        assert_eq!(to_bool(&json!("1")), Some(true));
        assert_eq!(to_bool(&json!("False")), Some(false));
        assert_eq!(to_bool(&json!(0)), Some(false));
        assert_eq!(to_bool(&json!(1)), Some(true));
        assert_eq!(to_bool(&json!(2)), None);
    }

    #[test]
    fn datetimes() {
        let expected = NaiveDate::from_ymd_opt(2025, 11, 15)
            .unwrap()
            .and_hms_opt(11, 56, 43)
            .unwrap();
        assert_eq!(to_datetime(&json!("2025-11-15T11:56:43.000000Z")), Some(expected));
        assert_eq!(to_datetime(&json!("2025-11-15T11:56:43")), Some(expected));
        assert_eq!(to_datetime(&json!("2025-11-15 11:56:43")), Some(expected));
        assert!(to_datetime(&json!("2025-11-15T11:56:43.123456")).is_some());
        assert_eq!(
            to_datetime(&json!("2025-11-15")),
            NaiveDate::from_ymd_opt(2025, 11, 15).unwrap().and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn element_counts() {
        assert_eq!(count_elements(Some("Si")), Some(1));
        assert_eq!(count_elements(Some("Ag,Br,C,H,N,S")), Some(6));
        assert_eq!(count_elements(Some("")), None);
        assert_eq!(count_elements(None), None);
    }

    #[test]
    fn null_tokens() {
        assert!(is_null_token("NULL"));
        assert!(is_null_token(" "));
        assert!(!is_null_token("Si"));
    }
}
