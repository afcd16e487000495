use serde::Serialize;
use serde_json::{Map, Value};

use crate::cli::OutputFormat;

pub mod table;

/// Columns shown first, in this order, when present.
const LEADING_COLUMNS: [&str; 6] = ["id", "name", "name_en", "status", "task_id", "execution_type"];

/// Render a serializable response in the requested format.
pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Raw => Ok(serde_json::to_string(value)?),
        OutputFormat::Table => render_table(serde_json::to_value(value)?),
    }
}

pub fn output<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    println!("{}", render(value, format)?);
    Ok(())
}

fn render_table(value: Value) -> anyhow::Result<String> {
    Ok(match value {
        Value::Array(items) if items.is_empty() => "(no rows)".to_string(),
        Value::Array(items) if items.iter().all(Value::is_object) => {
            let objects: Vec<Map<String, Value>> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            object_rows(&objects)
        }
        Value::Array(items) => {
            let rows: Vec<Vec<String>> = items.iter().map(|v| vec![cell(v)]).collect();
            table::render_table(&["value"], &rows)
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            order_columns(&mut keys);
            let rows: Vec<Vec<String>> = keys
                .into_iter()
                .map(|key| vec![key.clone(), cell(&map[key])])
                .collect();
            table::render_table(&["key", "value"], &rows)
        }
        scalar => cell(&scalar),
    })
}

/// One row per object. Nested documents are left out of the columns; they
/// are what `--format json` is for.
fn object_rows(objects: &[Map<String, Value>]) -> String {
    let mut headers: Vec<&String> = Vec::new();
    for map in objects {
        for (key, value) in map {
            if !headers.contains(&key) && !is_document(value) {
                headers.push(key);
            }
        }
    }
    order_columns(&mut headers);

    let rows: Vec<Vec<String>> = objects
        .iter()
        .map(|map| {
            headers
                .iter()
                .map(|h| map.get(h.as_str()).map_or_else(|| "-".to_string(), cell))
                .collect()
        })
        .collect();
    let headers: Vec<&str> = headers.iter().map(|h| h.as_str()).collect();
    table::render_table(&headers, &rows)
}

fn order_columns(keys: &mut [&String]) {
    keys.sort_by_key(|key| {
        let rank = LEADING_COLUMNS
            .iter()
            .position(|c| *c == key.as_str())
            .unwrap_or(LEADING_COLUMNS.len());
        (rank, key.to_string())
    });
}

fn is_document(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(|v| v.is_object() || v.is_array()),
        _ => false,
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
