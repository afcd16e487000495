//! Incremental filters built strictly from the structured watermark config.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

use hub_core::rules::source::{
    CompareOperator, FilterOperator, FilterRule, IncrementalConfig, IncrementalFieldType,
    SortField, SortOrder,
};
use hub_core::value::{compare_values, parse_timestamp, value_as_f64, value_as_string};

use crate::source::Predicate;

const fn filter_operator(op: CompareOperator) -> FilterOperator {
    match op {
        CompareOperator::Gt => FilterOperator::Gt,
        CompareOperator::Ge => FilterOperator::Ge,
        CompareOperator::Lt => FilterOperator::Lt,
        CompareOperator::Le => FilterOperator::Le,
    }
}

fn typed(config: &IncrementalConfig, raw: &str) -> Value {
    match config.field_type {
        IncrementalFieldType::Number => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.trim().parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        IncrementalFieldType::Timestamp | IncrementalFieldType::String => {
            Value::String(raw.to_string())
        }
    }
}

/// Current watermark: the last synced value, else the initial value.
#[must_use]
pub fn current_watermark(config: &IncrementalConfig) -> Option<&str> {
    config
        .last_sync_value
        .as_deref()
        .or(config.initial_value.as_deref())
        .filter(|v| !v.trim().is_empty())
}

/// Predicates selecting the rows a run must fetch.
///
/// A timestamp watermark with a lookback window also re-reads rows changed
/// in the last `max_lookback_hours`. Soft-deleted rows are excluded unless
/// `sync_deleted_records` is set.
#[must_use]
pub fn incremental_predicates(config: &IncrementalConfig, now: DateTime<Utc>) -> Vec<Predicate> {
    let mut predicates = Vec::new();

    if let Some(bound) = current_watermark(config) {
        let watermark = Predicate::Filter(FilterRule::new(
            &config.field,
            filter_operator(config.operator),
            typed(config, bound),
        ));
        let lookback = config.field_type == IncrementalFieldType::Timestamp
            && config.max_lookback_hours > 0
            && config.operator.is_ascending();
        if lookback {
            let since = now - Duration::hours(i64::from(config.max_lookback_hours));
            predicates.push(Predicate::AnyOf(vec![
                watermark,
                Predicate::Filter(FilterRule::new(
                    &config.field,
                    FilterOperator::Ge,
                    Value::String(since.to_rfc3339_opts(SecondsFormat::Secs, true)),
                )),
            ]));
        } else {
            predicates.push(watermark);
        }
    }

    if let Some(deleted) = config.deleted_field.as_deref() {
        if !config.sync_deleted_records {
            let is_null = Predicate::Filter(FilterRule::new(deleted, FilterOperator::IsNull, Value::Null));
            predicates.push(match &config.deleted_value {
                Some(marker) => Predicate::AnyOf(vec![
                    is_null,
                    Predicate::Filter(FilterRule::new(
                        deleted,
                        FilterOperator::Ne,
                        Value::String(marker.clone()),
                    )),
                ]),
                None => is_null,
            });
        }
    }

    predicates
}

/// Fetch order for an incremental interface: the incremental field first,
/// in the direction the watermark moves, then the interface's own sort.
///
/// A run cut short by a row cap can then only leave rows beyond its new
/// watermark unread.
#[must_use]
pub fn incremental_sort(config: &IncrementalConfig, sort: &[SortField]) -> Vec<SortField> {
    let order = if config.operator.is_ascending() {
        SortOrder::Asc
    } else {
        SortOrder::Desc
    };
    std::iter::once(SortField {
        field: config.field.clone(),
        order,
    })
    .chain(sort.iter().filter(|s| s.field != config.field).cloned())
    .collect()
}

/// Render an observed value the way the watermark stores it.
fn watermark_text(config: &IncrementalConfig, value: &Value) -> Option<String> {
    match config.field_type {
        IncrementalFieldType::Number => value_as_f64(value)
            .is_some()
            .then(|| value_as_string(value))
            .flatten(),
        IncrementalFieldType::Timestamp => {
            let text = value_as_string(value)?;
            parse_timestamp(&text).map(|_| text)
        }
        IncrementalFieldType::String => value_as_string(value),
    }
}

/// The new watermark after loading rows with the incremental values
/// `observed`, or `None` when nothing moves it forward.
///
/// For ascending operators this is the largest loaded value, for descending
/// ones the smallest. When the fetch was `truncated` and the operator is
/// strict, it stops one value short of the boundary so rows sharing the
/// boundary value are read again next run. It never moves backwards.
#[must_use]
pub fn advance_watermark(
    config: &IncrementalConfig,
    observed: &[&Value],
    truncated: bool,
) -> Option<String> {
    let ascending = config.operator.is_ascending();
    let valid: Vec<&Value> = observed
        .iter()
        .copied()
        .filter(|v| !v.is_null())
        .filter(|v| watermark_text(config, *v).is_some())
        .collect();
    let further = |a: &Value, b: &Value| {
        let ord = compare_values(a, b);
        if ascending { ord } else { ord.reverse() }
    };
    let mut best: &Value = valid.iter().copied().max_by(|a, b| further(*a, *b))?;

    let strict = matches!(config.operator, CompareOperator::Gt | CompareOperator::Lt);
    if truncated && strict {
        if let Some(below) = valid
            .iter()
            .copied()
            .filter(|v| further(*v, best).is_lt())
            .max_by(|a, b| further(*a, *b))
        {
            best = below;
        }
    }

    if let Some(current) = current_watermark(config) {
        let ord = compare_values(best, &typed(config, current));
        let forward = if ascending { ord.is_gt() } else { ord.is_lt() };
        if !forward {
            return None;
        }
    }
    watermark_text(config, best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hub_core::value::Record;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn updated_at() -> IncrementalConfig {
        let mut config = IncrementalConfig::new("updated_at", IncrementalFieldType::Timestamp);
        config.last_sync_value = Some("2024-01-01T00:00:00Z".into());
        config.batch_size = 500;
        config
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn watermark_filter_is_structured() {
        let predicates = incremental_predicates(&updated_at(), now());
        assert_eq!(
            predicates,
            vec![Predicate::Filter(FilterRule::new(
                "updated_at",
                FilterOperator::Gt,
                json!("2024-01-01T00:00:00Z")
            ))]
        );
    }

    #[test]
    fn initial_value_used_before_first_sync() {
        let mut config = IncrementalConfig::new("seq", IncrementalFieldType::Number);
        config.initial_value = Some("100".into());
        let predicates = incremental_predicates(&config, now());
        assert_eq!(
            predicates,
            vec![Predicate::Filter(FilterRule::new("seq", FilterOperator::Gt, json!(100)))]
        );
    }

    #[test]
    fn no_watermark_means_full_read() {
        let config = IncrementalConfig::new("updated_at", IncrementalFieldType::Timestamp);
        assert!(incremental_predicates(&config, now()).is_empty());
    }

    #[test]
    fn lookback_widens_the_window() {
        let mut config = updated_at();
        config.max_lookback_hours = 24;
        let predicates = incremental_predicates(&config, now());
        let Predicate::AnyOf(branches) = &predicates[0] else {
            panic!("expected any_of");
        };
        assert_eq!(
            branches[1],
            Predicate::Filter(FilterRule::new(
                "updated_at",
                FilterOperator::Ge,
                json!("2024-01-09T12:00:00Z")
            ))
        );
    }

    #[test]
    fn soft_deleted_rows_excluded_unless_synced() {
        let mut config = updated_at();
        config.deleted_field = Some("is_deleted".into());
        config.deleted_value = Some("Y".into());
        let predicates = incremental_predicates(&config, now());
        assert_eq!(predicates.len(), 2);
        assert!(predicates[1].matches(&rec(json!({"is_deleted": "N"}))));
        assert!(!predicates[1].matches(&rec(json!({"is_deleted": "Y"}))));

        config.sync_deleted_records = true;
        assert_eq!(incremental_predicates(&config, now()).len(), 1);
    }

    #[test]
    fn advances_to_max_observed() {
        let values = [
            json!("2024-01-03T08:00:00Z"),
            json!("2024-01-05T10:00:00Z"),
            Value::Null,
        ];
        let observed: Vec<&Value> = values.iter().collect();
        assert_eq!(
            advance_watermark(&updated_at(), &observed, false).as_deref(),
            Some("2024-01-05T10:00:00Z")
        );
    }

    #[test]
    fn never_moves_backwards() {
        let old = json!("2023-12-31T00:00:00Z");
        assert_eq!(advance_watermark(&updated_at(), &[&old], false), None);
        assert_eq!(advance_watermark(&updated_at(), &[], false), None);
    }

    #[test]
    fn numbers_compare_numerically() {
        let mut config = IncrementalConfig::new("seq", IncrementalFieldType::Number);
        config.last_sync_value = Some("9".into());
        let (ten, eight) = (json!(10), json!(8));
        assert_eq!(advance_watermark(&config, &[&ten, &eight], false).as_deref(), Some("10"));
    }

    #[test]
    fn descending_operator_tracks_minimum() {
        let mut config = IncrementalConfig::new("seq", IncrementalFieldType::Number);
        config.operator = CompareOperator::Lt;
        config.last_sync_value = Some("50".into());
        let (forty, thirty) = (json!(40), json!(30));
        assert_eq!(advance_watermark(&config, &[&forty, &thirty], false).as_deref(), Some("30"));
    }

    #[test]
    fn truncated_fetch_stops_short_of_the_boundary() {
        let values = [json!(11), json!(12), json!(13)];
        let observed: Vec<&Value> = values.iter().collect();
        let mut config = IncrementalConfig::new("seq", IncrementalFieldType::Number);
        config.last_sync_value = Some("10".into());
        assert_eq!(advance_watermark(&config, &observed, true).as_deref(), Some("12"));

        config.operator = CompareOperator::Ge;
        assert_eq!(advance_watermark(&config, &observed, true).as_deref(), Some("13"));
    }

    #[test]
    fn truncated_fetch_of_one_value_still_moves() {
        let values = [json!(11), json!(11)];
        let observed: Vec<&Value> = values.iter().collect();
        let mut config = IncrementalConfig::new("seq", IncrementalFieldType::Number);
        config.last_sync_value = Some("10".into());
        assert_eq!(advance_watermark(&config, &observed, true).as_deref(), Some("11"));
    }

    #[test]
    fn sort_leads_with_the_incremental_field() {
        let mut config = updated_at();
        let user = vec![
            SortField {
                field: "id".into(),
                order: SortOrder::Desc,
            },
            SortField {
                field: "updated_at".into(),
                order: SortOrder::Desc,
            },
        ];
        let sort = incremental_sort(&config, &user);
        assert_eq!(sort.len(), 2);
        assert_eq!(sort[0].field, "updated_at");
        assert_eq!(sort[0].order, SortOrder::Asc);
        assert_eq!(sort[1].field, "id");

        config.operator = CompareOperator::Le;
        assert_eq!(incremental_sort(&config, &[])[0].order, SortOrder::Desc);
    }
}
