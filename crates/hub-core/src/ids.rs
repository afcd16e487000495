//! ID prefixes for generated entity identifiers.
//!
//! IDs have the form `{prefix}-{8 hex chars}`, e.g. `stk-a3f8b2c1`.

pub const PREFIX_LIBRARY: &str = "thl";
pub const PREFIX_INTERFACE: &str = "thi";
pub const PREFIX_FLOW_GRAPH: &str = "dfg";
pub const PREFIX_API_INTERFACE: &str = "api";
pub const PREFIX_SYNC_TASK: &str = "stk";
pub const PREFIX_EXECUTION: &str = "exe";
pub const PREFIX_LINEAGE: &str = "lin";

/// Maximum length of a database identifier (schema, table, column).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Whether `name` is usable as an unquoted database identifier:
/// ASCII letter or underscore first, then letters, digits, or underscores.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `name` is usable as a schema/table name: like
/// [`is_valid_identifier`] but must start with a letter.
#[must_use]
pub fn is_valid_schema_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_alphabetic()) && is_valid_identifier(name)
}
