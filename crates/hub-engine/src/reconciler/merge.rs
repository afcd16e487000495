//! Pure field-list logic: type normalization, catalog merge, ordering, and
//! drift detection.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use hub_core::entities::TableField;
use hub_core::errors::CoreError;
use hub_core::ids::is_valid_identifier;

use crate::catalog::ColumnDefinition;

const COMMENT_SEPARATOR: &str = " - ";

/// Canonical short form of a column type: lowercase, no length modifier,
/// long-form names folded.
#[must_use]
pub fn normalize_type(data_type: &str) -> String {
    let base = data_type
        .split_once('(')
        .map_or(data_type, |(head, _)| head)
        .trim()
        .to_lowercase();
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");
    match base.as_str() {
        "character varying" => "varchar".into(),
        "character" => "char".into(),
        "double precision" => "double".into(),
        "timestamp without time zone" | "timestamp with time zone" | "timestamptz" => {
            "timestamp".into()
        }
        "integer" => "int".into(),
        "boolean" => "bool".into(),
        _ => base,
    }
}

/// Split a catalog comment of the form `Display - description`.
#[must_use]
pub fn split_comment(comment: &str) -> (String, String) {
    match comment.split_once(COMMENT_SEPARATOR) {
        Some((display, description)) => (display.trim().into(), description.trim().into()),
        None => (comment.trim().into(), String::new()),
    }
}

/// Inverse of [`split_comment`].
#[must_use]
pub fn join_comment(field: &TableField) -> Option<String> {
    match (field.name_zh.is_empty(), field.description.is_empty()) {
        (true, true) => None,
        (false, true) => Some(field.name_zh.clone()),
        (true, false) => Some(field.description.clone()),
        (false, false) => Some(format!(
            "{}{COMMENT_SEPARATOR}{}",
            field.name_zh, field.description
        )),
    }
}

fn field_from_column(column: &ColumnDefinition) -> TableField {
    let (display, description) = column
        .comment
        .as_deref()
        .map(split_comment)
        .unwrap_or_default();
    TableField {
        name_en: column.name.clone(),
        name_zh: display,
        data_type: normalize_type(&column.data_type),
        is_primary_key: column.is_primary_key,
        is_unique: column.is_unique,
        is_nullable: column.is_nullable,
        default_value: column.default_value.clone(),
        order_num: column.ordinal,
        description,
        is_increment_field: false,
    }
}

/// Fields with an explicit order come first, by order; ties and unordered
/// fields fall back to the field name.
fn field_order(a: &TableField, b: &TableField) -> Ordering {
    match (a.order_num, b.order_num) {
        (0, 0) => Ordering::Equal,
        (0, _) => Ordering::Greater,
        (_, 0) => Ordering::Less,
        (x, y) => x.cmp(&y),
    }
    .then_with(|| a.name_en.cmp(&b.name_en))
}

/// Sort by resolved order and renumber densely from 1.
pub fn renumber(fields: &mut [TableField]) {
    fields.sort_by(field_order);
    for (order, field) in (1_u32..).zip(fields.iter_mut()) {
        field.order_num = order;
    }
}

/// Merge catalog columns with the stored config.
///
/// The catalog decides structure. Display name, a longer description,
/// an explicit order, and the increment flag survive from the config.
#[must_use]
pub fn merge_fields(columns: &[ColumnDefinition], existing: &[TableField]) -> Vec<TableField> {
    let by_name: HashMap<&str, &TableField> =
        existing.iter().map(|f| (f.name_en.as_str(), f)).collect();
    let mut merged: Vec<TableField> = columns
        .iter()
        .map(|column| {
            let mut field = field_from_column(column);
            if let Some(old) = by_name.get(column.name.as_str()) {
                if old.order_num > 0 {
                    field.order_num = old.order_num;
                }
                if !old.name_zh.is_empty() && old.name_zh != column.name {
                    field.name_zh.clone_from(&old.name_zh);
                }
                if old.description.len() > field.description.len() {
                    field.description.clone_from(&old.description);
                }
                field.is_increment_field = old.is_increment_field;
            }
            field
        })
        .collect();
    renumber(&mut merged);
    merged
}

/// Structural equality: same field count and, per field name, the same
/// type, key, nullability, and uniqueness.
#[must_use]
pub fn fields_equivalent(stored: &[TableField], actual: &[TableField]) -> bool {
    if stored.len() != actual.len() {
        return false;
    }
    let by_name: HashMap<&str, &TableField> =
        actual.iter().map(|f| (f.name_en.as_str(), f)).collect();
    stored.iter().all(|field| {
        by_name.get(field.name_en.as_str()).is_some_and(|other| {
            normalize_type(&field.data_type) == normalize_type(&other.data_type)
                && field.is_primary_key == other.is_primary_key
                && field.is_nullable == other.is_nullable
                && field.is_unique == other.is_unique
        })
    })
}

/// Check a declared field list before it reaches the catalog.
///
/// # Errors
///
/// Returns `CoreError::Validation` listing every problem.
pub fn validate_fields(fields: &[TableField]) -> Result<(), CoreError> {
    let mut errors = Vec::new();
    if fields.is_empty() {
        errors.push("fields: at least one field is required".to_string());
    }
    let mut seen = HashSet::new();
    for (i, field) in fields.iter().enumerate() {
        if !is_valid_identifier(&field.name_en) {
            errors.push(format!("fields[{i}].name_en: '{}' is not a valid identifier", field.name_en));
        }
        if !seen.insert(field.name_en.to_lowercase()) {
            errors.push(format!("fields[{i}].name_en: '{}' is declared twice", field.name_en));
        }
        if field.data_type.trim().is_empty() {
            errors.push(format!("fields[{i}].data_type: must not be empty"));
        }
        if field.is_primary_key && field.is_nullable {
            errors.push(format!("fields[{i}]: primary key '{}' cannot be nullable", field.name_en));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(errors.join("; ")))
    }
}

/// Catalog columns for a declared field list, in field order.
#[must_use]
pub fn to_columns(fields: &[TableField]) -> Vec<ColumnDefinition> {
    fields
        .iter()
        .map(|field| ColumnDefinition {
            name: field.name_en.clone(),
            data_type: field.data_type.clone(),
            is_nullable: field.is_nullable && !field.is_primary_key,
            is_primary_key: field.is_primary_key,
            is_unique: field.is_unique,
            default_value: field.default_value.clone(),
            comment: join_comment(field),
            ordinal: field.order_num,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("character varying(255)", "varchar")]
    #[case("VARCHAR(64)", "varchar")]
    #[case("double precision", "double")]
    #[case("timestamp without time zone", "timestamp")]
    #[case("numeric(10, 2)", "numeric")]
    #[case("text", "text")]
    fn normalizes_types(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_type(raw), expected);
    }

    fn column(name: &str, ty: &str, ordinal: u32) -> ColumnDefinition {
        let mut c = ColumnDefinition::new(name, ty);
        c.ordinal = ordinal;
        c
    }

    #[test]
    fn merge_keeps_user_metadata() {
        let mut email = column("email", "character varying(255)", 2);
        email.comment = Some("Email - contact".into());
        email.is_unique = true;
        let columns = vec![column("id", "integer", 1), email];

        let mut old = TableField::new("email", "varchar");
        old.name_zh = "Contact email".into();
        old.description = "Primary contact address for notices".into();
        old.is_increment_field = true;
        old.order_num = 1;

        let merged = merge_fields(&columns, &[old]);
        assert_eq!(merged[0].name_en, "email");
        assert_eq!(merged[0].name_zh, "Contact email");
        assert_eq!(merged[0].description, "Primary contact address for notices");
        assert_eq!(merged[0].data_type, "varchar");
        assert!(merged[0].is_unique && merged[0].is_increment_field);
        assert_eq!(merged[1].name_en, "id");
        assert_eq!(merged[1].order_num, 2);
    }

    #[test]
    fn comment_display_name() {
        let merged = merge_fields(
            &[{
                let mut c = column("age", "int", 1);
                c.comment = Some("Age".into());
                c
            }],
            &[],
        );
        assert_eq!(merged[0].name_zh, "Age");
        assert_eq!(merged[0].description, "");
    }

    #[test]
    fn renumber_is_dense() {
        let mut fields: Vec<TableField> = [("c", 7), ("a", 0), ("b", 3), ("d", 3), ("e", 0)]
            .into_iter()
            .map(|(name, order)| {
                let mut f = TableField::new(name, "text");
                f.order_num = order;
                f
            })
            .collect();
        renumber(&mut fields);
        let got: Vec<(&str, u32)> = fields.iter().map(|f| (f.name_en.as_str(), f.order_num)).collect();
        assert_eq!(got, vec![("b", 1), ("d", 2), ("c", 3), ("a", 4), ("e", 5)]);
    }

    #[test]
    fn equivalence_ignores_metadata_and_type_spelling() {
        let mut a = TableField::new("name", "character varying(64)");
        a.name_zh = "Name".into();
        let b = TableField::new("name", "varchar");
        assert!(fields_equivalent(&[a.clone()], &[b.clone()]));

        let mut c = b.clone();
        c.is_nullable = false;
        assert!(!fields_equivalent(&[a.clone()], &[c]));
        assert!(!fields_equivalent(&[a], &[b.clone(), TableField::new("x", "int")]));
    }

    #[test]
    fn validation_lists_every_problem() {
        let mut pk = TableField::new("id", "int");
        pk.is_primary_key = true;
        let err = validate_fields(&[pk, TableField::new("ID", "int"), TableField::new("bad name", "")])
            .unwrap_err()
            .to_string();
        assert!(err.contains("cannot be nullable"));
        assert!(err.contains("declared twice"));
        assert!(err.contains("not a valid identifier"));
        assert!(err.contains("data_type"));
    }
}
