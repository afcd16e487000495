//! Source-field to target-field mapping.

use serde_json::{Number, Value};

use hub_core::rules::mapping::{DataType, FieldMappingRule, FieldMappingRules, UnmappedFields, ValueTransform};
use hub_core::value::{Record, parse_timestamp, value_as_f64, value_as_string};

/// Why a record could not be mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingFailure {
    pub field: String,
    pub message: String,
}

impl MappingFailure {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Look up `path` in a record. Dots descend into nested objects.
fn lookup<'a>(record: &'a Record, path: &str, case_sensitive: bool) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = get_field(record, first, case_sensitive)?;
    for part in parts {
        current = get_field(current.as_object()?, part, case_sensitive)?;
    }
    Some(current)
}

fn get_field<'a>(record: &'a Record, name: &str, case_sensitive: bool) -> Option<&'a Value> {
    if case_sensitive {
        return record.get(name);
    }
    record.get(name).or_else(|| {
        record
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn top_level_key<'a>(record: &'a Record, path: &str, case_sensitive: bool) -> Option<&'a str> {
    let first = path.split('.').next()?;
    if record.contains_key(first) {
        return record.get_key_value(first).map(|(k, _)| k.as_str());
    }
    if case_sensitive {
        return None;
    }
    record
        .keys()
        .find(|k| k.eq_ignore_ascii_case(first))
        .map(String::as_str)
}

fn number(f: f64) -> Option<Value> {
    Number::from_f64(f).map(Value::Number)
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "t" => Some(true),
            "false" | "0" | "no" | "n" | "f" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_integer(value: &Value) -> Option<Value> {
    if let Some(i) = value.as_i64() {
        return Some(Value::from(i));
    }
    let f = value_as_f64(value)?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15).then(|| Value::from(f as i64))
}

/// Apply a named transform.
///
/// # Errors
///
/// Returns a message when the value cannot take the transform.
pub fn apply_transform(transform: ValueTransform, value: Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(value);
    }
    let text = || value_as_string(&value).unwrap_or_default();
    match transform {
        ValueTransform::Trim => Ok(match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        }),
        ValueTransform::Upper => Ok(Value::String(text().to_uppercase())),
        ValueTransform::Lower => Ok(Value::String(text().to_lowercase())),
        ValueTransform::ToString => Ok(Value::String(text())),
        ValueTransform::ToNumber => value_as_f64(&value)
            .and_then(number)
            .ok_or_else(|| format!("'{}' is not a number", text())),
        ValueTransform::ToInteger => {
            to_integer(&value).ok_or_else(|| format!("'{}' is not an integer", text()))
        }
        ValueTransform::ToBool => parse_bool(&value)
            .map(Value::Bool)
            .ok_or_else(|| format!("'{}' is not a boolean", text())),
    }
}

/// Coerce a value to a declared type.
///
/// # Errors
///
/// Returns a message when the value does not fit the type.
pub fn coerce(data_type: DataType, value: Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(value);
    }
    match data_type {
        DataType::String => apply_transform(ValueTransform::ToString, value),
        DataType::Integer => apply_transform(ValueTransform::ToInteger, value),
        DataType::Float => apply_transform(ValueTransform::ToNumber, value),
        DataType::Boolean => apply_transform(ValueTransform::ToBool, value),
        DataType::Timestamp => {
            let text = value_as_string(&value).unwrap_or_default();
            parse_timestamp(&text)
                .map(|dt| Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
                .ok_or_else(|| format!("'{text}' is not a timestamp"))
        }
        DataType::Json => Ok(match value {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        }),
    }
}

fn map_field(
    rule: &FieldMappingRule,
    record: &Record,
    case_sensitive: bool,
) -> Result<Option<Value>, MappingFailure> {
    let source = lookup(record, &rule.source, case_sensitive).cloned();
    let value = match source {
        Some(v) if !v.is_null() => v,
        found => match &rule.default_value {
            Some(default) => default.clone(),
            None if rule.required => {
                return Err(MappingFailure::new(&rule.target, "required field is missing"));
            }
            None if found.is_some() => Value::Null,
            None => return Ok(None),
        },
    };

    let value = match rule.transform {
        Some(t) => apply_transform(t, value).map_err(|m| MappingFailure::new(&rule.target, m))?,
        None => value,
    };
    let value = match rule.data_type {
        Some(dt) => coerce(dt, value).map_err(|m| MappingFailure::new(&rule.target, m))?,
        None => value,
    };
    if value.is_null() && !rule.nullable {
        return Err(MappingFailure::new(&rule.target, "null in a non-nullable field"));
    }
    Ok(Some(value))
}

/// Map one record. Fields no rule mentions are kept or dropped per `unmapped`.
///
/// # Errors
///
/// Returns the first field that could not be mapped.
pub fn map_record(rules: &FieldMappingRules, record: &Record) -> Result<Record, MappingFailure> {
    map_with(&rules.mappings, rules.unmapped, rules.case_sensitive, record)
}

/// Map with a bare rule list, keeping unmapped fields. Used for per-source
/// interface mappings.
///
/// # Errors
///
/// Returns the first field that could not be mapped.
pub fn map_source_fields(
    mappings: &[FieldMappingRule],
    record: &Record,
) -> Result<Record, MappingFailure> {
    map_with(mappings, UnmappedFields::Keep, true, record)
}

fn map_with(
    mappings: &[FieldMappingRule],
    unmapped: UnmappedFields,
    case_sensitive: bool,
    record: &Record,
) -> Result<Record, MappingFailure> {
    if mappings.is_empty() {
        return Ok(record.clone());
    }
    let mut out = Record::new();
    if unmapped == UnmappedFields::Keep {
        let consumed: Vec<&str> = mappings
            .iter()
            .filter_map(|rule| top_level_key(record, &rule.source, case_sensitive))
            .collect();
        for (k, v) in record {
            if !consumed.contains(&k.as_str()) {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    for rule in mappings {
        if let Some(value) = map_field(rule, record, case_sensitive)? {
            out.insert(rule.target.clone(), value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn rules(mappings: Vec<FieldMappingRule>, unmapped: UnmappedFields) -> FieldMappingRules {
        FieldMappingRules {
            mappings,
            unmapped,
            case_sensitive: true,
        }
    }

    #[test]
    fn renames_transforms_and_keeps_the_rest() {
        let mut name = FieldMappingRule::new("full_name", "name");
        name.transform = Some(ValueTransform::Trim);
        let mut age = FieldMappingRule::new("age_text", "age");
        age.data_type = Some(DataType::Integer);

        let out = map_record(
            &rules(vec![name, age], UnmappedFields::Keep),
            &rec(json!({"full_name": "  Ada ", "age_text": "36", "city": "London"})),
        )
        .unwrap();
        assert_eq!(out, rec(json!({"name": "Ada", "age": 36, "city": "London"})));
    }

    #[test]
    fn drop_keeps_only_targets() {
        let out = map_record(
            &rules(vec![FieldMappingRule::new("a", "b")], UnmappedFields::Drop),
            &rec(json!({"a": 1, "c": 2})),
        )
        .unwrap();
        assert_eq!(out, rec(json!({"b": 1})));
    }

    #[test]
    fn default_fills_absent_source() {
        let mut status = FieldMappingRule::new("status", "status");
        status.default_value = Some(json!("active"));
        status.required = true;
        let out = map_record(&rules(vec![status], UnmappedFields::Drop), &rec(json!({}))).unwrap();
        assert_eq!(out["status"], json!("active"));
    }

    #[test]
    fn required_without_default_fails() {
        let mut id = FieldMappingRule::new("id", "id");
        id.required = true;
        let err = map_record(&rules(vec![id], UnmappedFields::Keep), &rec(json!({"x": 1})))
            .unwrap_err();
        assert_eq!(err.field, "id");
    }

    #[test]
    fn non_nullable_rejects_explicit_null() {
        let mut email = FieldMappingRule::new("email", "email");
        email.nullable = false;
        let err = map_record(
            &rules(vec![email], UnmappedFields::Keep),
            &rec(json!({"email": null})),
        )
        .unwrap_err();
        assert!(err.message.contains("non-nullable"));
    }

    #[test]
    fn nested_and_case_insensitive_lookup() {
        let mut config = rules(
            vec![FieldMappingRule::new("Address.City", "city")],
            UnmappedFields::Drop,
        );
        config.case_sensitive = false;
        let out = map_record(&config, &rec(json!({"address": {"city": "Oslo"}}))).unwrap();
        assert_eq!(out, rec(json!({"city": "Oslo"})));
    }

    #[test]
    fn conversion_failure_names_field() {
        let mut n = FieldMappingRule::new("n", "n");
        n.transform = Some(ValueTransform::ToNumber);
        let err = map_record(&rules(vec![n], UnmappedFields::Keep), &rec(json!({"n": "abc"})))
            .unwrap_err();
        assert_eq!(err.to_string(), "n: 'abc' is not a number");
    }

    #[test]
    fn timestamps_normalize_to_rfc3339() {
        assert_eq!(
            coerce(DataType::Timestamp, json!("2024-01-05 10:00:00")).unwrap(),
            json!("2024-01-05T10:00:00Z")
        );
        assert_eq!(coerce(DataType::Boolean, json!("yes")).unwrap(), json!(true));
        assert_eq!(coerce(DataType::Json, json!("[1,2]")).unwrap(), json!([1, 2]));
    }
}
