//! Dynamic records and value helpers.
//!
//! Batches moving through the pipeline are ordered sequences of string-keyed,
//! dynamically-typed field maps. `serde_json::Map` preserves insertion order
//! only with the `preserve_order` feature, so nothing here relies on key order.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// One source or target row.
pub type Record = serde_json::Map<String, Value>;

/// Fields checked, in order, for a natural record identifier.
const IDENTIFIER_FIELDS: [&str; 3] = ["id", "uuid", "pk"];

/// Render a scalar as text. `Null` has no text form.
#[must_use]
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Interpret a value as a number, parsing numeric strings.
#[must_use]
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Null, blank, or a textual null marker.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s.eq_ignore_ascii_case("null") || s == "nil"
        }
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Parse the timestamp shapes seen in source systems.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Order two values: numerically when both are numbers, chronologically when
/// both are timestamps, otherwise by their text form. `Null` sorts first.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    if let (Some(x), Some(y)) = (value_as_f64(a), value_as_f64(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    let (sa, sb) = (
        value_as_string(a).unwrap_or_default(),
        value_as_string(b).unwrap_or_default(),
    );
    if let (Some(x), Some(y)) = (parse_timestamp(&sa), parse_timestamp(&sb)) {
        return x.cmp(&y);
    }
    sa.cmp(&sb)
}

/// Natural identifier of a record, falling back to its batch position.
#[must_use]
pub fn record_identifier(record: &Record, index: usize) -> String {
    IDENTIFIER_FIELDS
        .iter()
        .find_map(|field| record.get(*field).and_then(value_as_string))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("record_{index}"))
}

/// Fraction of a record's fields that are non-empty. Empty records score 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn completeness(record: &Record) -> f64 {
    if record.is_empty() {
        return 0.0;
    }
    let filled = record.values().filter(|v| !is_empty_value(v)).count();
    filled as f64 / record.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn numbers_compare_numerically_even_as_strings() {
        assert_eq!(compare_values(&json!("10"), &json!(9)), Ordering::Greater);
        assert_eq!(compare_values(&json!(2.5), &json!("2.5")), Ordering::Equal);
    }

    #[test]
    fn timestamps_compare_chronologically() {
        assert_eq!(
            compare_values(
                &json!("2024-01-05T10:00:00Z"),
                &json!("2024-01-05 09:00:00")
            ),
            Ordering::Greater
        );
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(compare_values(&Value::Null, &json!("a")), Ordering::Less);
    }

    #[test]
    fn identifier_prefers_id_then_uuid() {
        let rec = record(json!({"uuid": "u-1", "name": "x"}));
        assert_eq!(record_identifier(&rec, 4), "u-1");
        let rec = record(json!({"name": "x"}));
        assert_eq!(record_identifier(&rec, 4), "record_4");
        let rec = record(json!({"id": 17}));
        assert_eq!(record_identifier(&rec, 0), "17");
    }

    #[test]
    fn empty_markers() {
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!("NULL")));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
    }

    #[test]
    fn completeness_counts_filled_fields() {
        let rec = record(json!({"a": 1, "b": null, "c": "", "d": "x"}));
        assert!((completeness(&rec) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_date_only() {
        let ts = parse_timestamp("2024-01-05").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-05T00:00:00+00:00");
    }
}
