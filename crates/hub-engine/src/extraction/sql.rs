//! Raw SQL data sources: read-only validation and `{{name}}` binding.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use hub_core::errors::CoreError;
use hub_core::rules::source::SqlQueryConfig;

use crate::source::BoundQuery;

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(DROP|DELETE|UPDATE|INSERT|ALTER|TRUNCATE|CREATE|GRANT|REVOKE)\b")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Drop `--` comments, leaving quoted text alone.
#[must_use]
pub fn strip_line_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    for line in sql.lines() {
        let mut in_quote = false;
        let mut prev_dash = false;
        let mut cut = line.len();
        for (i, c) in line.char_indices() {
            match c {
                '\'' => {
                    in_quote = !in_quote;
                    prev_dash = false;
                }
                '-' if !in_quote => {
                    if prev_dash {
                        cut = i - 1;
                        break;
                    }
                    prev_dash = true;
                }
                _ => prev_dash = false,
            }
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}

/// Accept a single `SELECT` or `WITH` statement with no write keywords.
///
/// # Errors
///
/// Returns `CoreError::Validation` naming what was rejected.
pub fn validate_select(sql: &str) -> Result<(), CoreError> {
    let code = strip_line_comments(sql);
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("sql_query: must not be empty".into()));
    }
    let head = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if head != "SELECT" && head != "WITH" {
        return Err(CoreError::Validation(format!(
            "sql_query: only SELECT or WITH statements are allowed, found '{head}'"
        )));
    }
    if let Some(m) = FORBIDDEN.find(trimmed) {
        return Err(CoreError::Validation(format!(
            "sql_query: forbidden keyword '{}'",
            m.as_str().to_ascii_uppercase()
        )));
    }
    if trimmed.trim_end_matches(';').contains(';') {
        return Err(CoreError::Validation(
            "sql_query: multiple statements are not allowed".into(),
        ));
    }
    Ok(())
}

/// Validate a query and turn its placeholders into positional parameters.
///
/// Parameters the query never references are ignored.
///
/// # Errors
///
/// Returns `CoreError::Validation` for a rejected statement or a
/// placeholder with no parameter.
pub fn bind(config: &SqlQueryConfig) -> Result<BoundQuery, CoreError> {
    validate_select(&config.sql_query)?;
    let mut params = Vec::new();
    let mut missing = Vec::new();
    let sql = PLACEHOLDER.replace_all(&config.sql_query, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match config.parameters.get(name) {
            Some(value) => params.push(bindable(value)),
            None => missing.push(name.to_string()),
        }
        "?"
    });
    if !missing.is_empty() {
        return Err(CoreError::Validation(format!(
            "sql_query: no parameter for {}",
            missing.join(", ")
        )));
    }
    Ok(BoundQuery {
        sql: sql.trim().trim_end_matches(';').trim_end().to_string(),
        params,
    })
}

fn bindable(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("SELECT * FROM people")]
    #[case("  with recent AS (SELECT 1) SELECT * FROM recent")]
    #[case("SELECT * FROM people WHERE status = 'deleted'")]
    #[case("SELECT id FROM people -- DROP TABLE people\n")]
    #[case("SELECT updated_at, created_by FROM audit;")]
    fn accepts_read_only(#[case] sql: &str) {
        assert!(validate_select(sql).is_ok(), "{sql}");
    }

    #[rstest]
    #[case("DELETE FROM people", "only SELECT")]
    #[case("SELECT 1; DROP TABLE people", "forbidden keyword 'DROP'")]
    #[case("WITH x AS (INSERT INTO t VALUES (1)) SELECT 1", "forbidden keyword 'INSERT'")]
    #[case("SELECT 1; SELECT 2", "multiple statements")]
    #[case("-- nothing here", "must not be empty")]
    fn rejects(#[case] sql: &str, #[case] expected: &str) {
        let err = validate_select(sql).unwrap_err();
        assert!(err.to_string().contains(expected), "{sql}: {err}");
    }

    #[test]
    fn comment_markers_inside_quotes_are_kept() {
        let stripped = strip_line_comments("SELECT '--x' AS a -- tail");
        assert_eq!(stripped.trim(), "SELECT '--x' AS a");
    }

    #[test]
    fn binds_placeholders_in_order() {
        let mut config =
            SqlQueryConfig::new("SELECT * FROM people WHERE city = {{city}} AND age > {{ min_age }}");
        config.parameters.insert("min_age".into(), json!(18));
        config.parameters.insert("city".into(), json!("Oslo"));
        config.parameters.insert("unused".into(), json!(true));

        let bound = bind(&config).unwrap();
        assert_eq!(bound.sql, "SELECT * FROM people WHERE city = ? AND age > ?");
        assert_eq!(bound.params, vec![json!("Oslo"), json!(18)]);
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let config = SqlQueryConfig::new("SELECT * FROM people WHERE city = {{city}}");
        let err = bind(&config).unwrap_err();
        assert!(matches!(err, CoreError::Validation(ref m) if m.contains("city")));
    }
}
