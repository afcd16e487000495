//! Quality stage: scores records against quality rules without changing them.

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use serde_json::Value;

use hub_core::enums::{GovernanceStage, IssueSeverity};
use hub_core::governance::{
    ISSUE_QUALITY_BELOW_THRESHOLD, ISSUE_QUALITY_CHECK_ERROR, Issue, RuleOutcome,
};
use hub_core::rules::governance::{QualityCheck, QualityRule, ValueFormat, ValueKind};
use hub_core::value::{Record, is_empty_value, parse_timestamp, value_as_f64, value_as_string};

use super::BatchContext;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9][0-9\s\-()]{5,19}$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^\s/$.?#][^\s]*$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// A quality rule with its pattern compiled once per batch.
#[derive(Debug)]
struct CompiledRule {
    rule: QualityRule,
    pattern: Result<Option<Regex>, String>,
}

impl CompiledRule {
    fn new(rule: &QualityRule) -> Self {
        let raw = match &rule.check {
            QualityCheck::Accuracy { pattern, .. } | QualityCheck::Validity { pattern, .. } => {
                pattern.as_deref()
            }
            _ => None,
        };
        let pattern = raw
            .map(Regex::new)
            .transpose()
            .map_err(|e| format!("invalid pattern: {e}"));
        Self {
            rule: rule.clone(),
            pattern,
        }
    }
}

/// Enabled quality rules of one task.
#[derive(Debug)]
pub struct QualityStage {
    rules: Vec<CompiledRule>,
}

/// What the quality stage found for a slice of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub outcomes: Vec<RuleOutcome>,
    pub issues: Vec<Issue>,
    /// Per-record score in `0.0..=1.0`, aligned with the input.
    pub scores: Vec<f64>,
}

impl QualityStage {
    #[must_use]
    pub fn new(rules: &[QualityRule]) -> Self {
        Self {
            rules: rules.iter().filter(|r| r.enabled).map(CompiledRule::new).collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fields that uniqueness rules count across the whole batch.
    pub(crate) fn uniqueness_fields(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|c| matches!(c.rule.check, QualityCheck::Uniqueness))
            .flat_map(|c| c.rule.fields.iter().map(String::as_str))
    }

    /// Score each record. A record whose evaluation errors scores 0.
    #[must_use]
    pub fn evaluate(&self, records: &[Record], ids: &[String], ctx: &BatchContext) -> QualityReport {
        let mut report = QualityReport {
            outcomes: self
                .rules
                .iter()
                .map(|c| {
                    let mut outcome = RuleOutcome::new(
                        GovernanceStage::Quality,
                        &c.rule.id,
                        &c.rule.name,
                        c.rule.check.as_str(),
                    );
                    outcome.score = Some(1.0);
                    outcome
                })
                .collect(),
            issues: Vec::new(),
            scores: Vec::with_capacity(records.len()),
        };

        for (record, id) in records.iter().zip(ids) {
            let mut weighted = 0.0;
            let mut weights = 0.0;
            let mut errored = false;

            for (compiled, outcome) in self.rules.iter().zip(report.outcomes.iter_mut()) {
                let rule = &compiled.rule;
                let mut partial = RuleOutcome::new(
                    GovernanceStage::Quality,
                    &rule.id,
                    &rule.name,
                    rule.check.as_str(),
                );
                partial.records_evaluated = 1;

                let pattern = match &compiled.pattern {
                    Ok(pattern) => pattern.as_ref(),
                    Err(message) => {
                        errored = true;
                        partial.issues = 1;
                        partial.score = Some(0.0);
                        report.issues.push(
                            Issue::new(ISSUE_QUALITY_CHECK_ERROR, IssueSeverity::Error, id, message)
                                .with_rule(&rule.id),
                        );
                        absorb(outcome, &partial);
                        continue;
                    }
                };

                let failed: Vec<&str> = rule
                    .fields
                    .iter()
                    .filter(|field| !check_field(rule, pattern, record, field, ctx))
                    .map(String::as_str)
                    .collect();
                #[allow(clippy::cast_precision_loss)]
                let fraction = if rule.fields.is_empty() {
                    1.0
                } else {
                    (rule.fields.len() - failed.len()) as f64 / rule.fields.len() as f64
                };
                partial.score = Some(fraction);
                weighted += rule.weight * fraction;
                weights += rule.weight;

                if fraction + f64::EPSILON >= rule.threshold {
                    partial.records_affected = 1;
                } else {
                    partial.issues = 1;
                    let mut issue = Issue::new(
                        ISSUE_QUALITY_BELOW_THRESHOLD,
                        IssueSeverity::Warning,
                        id,
                        format!(
                            "{} check '{}' failed on {}",
                            rule.check.as_str(),
                            rule.name,
                            failed.join(", ")
                        ),
                    )
                    .with_rule(&rule.id);
                    if let Some(first) = failed.first() {
                        issue = issue.with_field(*first);
                    }
                    report.issues.push(issue);
                }
                absorb(outcome, &partial);
            }

            let score = if errored {
                0.0
            } else if weights > 0.0 {
                weighted / weights
            } else {
                1.0
            };
            report.scores.push(score);
        }
        report
    }
}

fn absorb(outcome: &mut RuleOutcome, partial: &RuleOutcome) {
    if outcome.records_evaluated == 0 {
        outcome.score = partial.score;
        outcome.records_evaluated = partial.records_evaluated;
        outcome.records_affected = partial.records_affected;
        outcome.issues = partial.issues;
    } else {
        outcome.absorb(partial);
    }
}

fn matches_format(format: ValueFormat, text: &str) -> bool {
    match format {
        ValueFormat::Email => EMAIL.is_match(text),
        ValueFormat::Phone => PHONE.is_match(text),
        ValueFormat::Date => parse_timestamp(text).is_some(),
        ValueFormat::Number => text.trim().parse::<f64>().is_ok(),
        ValueFormat::Url => URL.is_match(text),
    }
}

fn matches_kind(kind: ValueKind, value: &Value) -> bool {
    match kind {
        ValueKind::String => value.is_string(),
        ValueKind::Number => value.is_number(),
        ValueKind::Integer => value.is_i64() || value.is_u64(),
        ValueKind::Boolean => value.is_boolean(),
        ValueKind::Timestamp => value.as_str().and_then(parse_timestamp).is_some(),
    }
}

fn check_field(
    rule: &QualityRule,
    pattern: Option<&Regex>,
    record: &Record,
    field: &str,
    ctx: &BatchContext,
) -> bool {
    let value = record.get(field).unwrap_or(&Value::Null);
    if let QualityCheck::Uniqueness = rule.check {
        return value_as_string(value).is_none_or(|text| ctx.occurrences(field, &text) <= 1);
    }
    if is_empty_value(value) {
        return false;
    }
    let text = value_as_string(value).unwrap_or_default();
    match &rule.check {
        QualityCheck::Completeness | QualityCheck::Uniqueness => true,
        QualityCheck::Accuracy {
            format, min, max, ..
        } => {
            if format.is_some_and(|f| !matches_format(f, &text)) {
                return false;
            }
            if pattern.is_some_and(|re| !re.is_match(&text)) {
                return false;
            }
            if min.is_some() || max.is_some() {
                let Some(n) = value_as_f64(value) else {
                    return false;
                };
                if min.is_some_and(|lo| n < lo) || max.is_some_and(|hi| n > hi) {
                    return false;
                }
            }
            true
        }
        QualityCheck::Validity { allowed_values, .. } => {
            let allowed = allowed_values.is_empty()
                || allowed_values
                    .iter()
                    .any(|v| value_as_string(v).as_deref() == Some(text.as_str()));
            allowed && pattern.is_none_or(|re| re.is_match(&text))
        }
        QualityCheck::Consistency { expected_type } => matches_kind(*expected_type, value),
        QualityCheck::Timeliness { max_age_hours } => parse_timestamp(&text)
            .is_some_and(|ts| ctx.now - ts <= Duration::hours(i64::from(*max_age_hours))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("r{i}")).collect()
    }

    fn ctx(stage: &QualityStage, records: &[Record]) -> BatchContext {
        BatchContext::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            stage,
            records,
        )
    }

    fn score_one(check: QualityCheck, value: Value) -> f64 {
        let stage = QualityStage::new(&[QualityRule::new("q", check, ["f"])]);
        let records = vec![rec(json!({ "f": value }))];
        stage.evaluate(&records, &ids(1), &ctx(&stage, &records)).scores[0]
    }

    #[rstest]
    #[case(QualityCheck::Completeness, json!("x"), 1.0)]
    #[case(QualityCheck::Completeness, json!(" "), 0.0)]
    #[case(QualityCheck::Accuracy { format: Some(ValueFormat::Email), pattern: None, min: None, max: None }, json!("a@b.io"), 1.0)]
    #[case(QualityCheck::Accuracy { format: Some(ValueFormat::Email), pattern: None, min: None, max: None }, json!("a@b"), 0.0)]
    #[case(QualityCheck::Accuracy { format: None, pattern: None, min: Some(0.0), max: Some(120.0) }, json!("130"), 0.0)]
    #[case(QualityCheck::Validity { allowed_values: vec![json!("M"), json!("F")], pattern: None }, json!("F"), 1.0)]
    #[case(QualityCheck::Validity { allowed_values: vec![], pattern: Some("^[A-Z]{2}$".into()) }, json!("cn"), 0.0)]
    #[case(QualityCheck::Consistency { expected_type: ValueKind::Integer }, json!(3), 1.0)]
    #[case(QualityCheck::Consistency { expected_type: ValueKind::Integer }, json!("3"), 0.0)]
    #[case(QualityCheck::Timeliness { max_age_hours: 24 }, json!("2024-06-01T00:00:00Z"), 1.0)]
    #[case(QualityCheck::Timeliness { max_age_hours: 24 }, json!("2024-05-01T00:00:00Z"), 0.0)]
    fn checks(#[case] check: QualityCheck, #[case] value: Value, #[case] expected: f64) {
        assert!((score_one(check, value) - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn uniqueness_counts_across_the_batch() {
        let stage = QualityStage::new(&[QualityRule::new("u", QualityCheck::Uniqueness, ["id"])]);
        let records = vec![rec(json!({"id": 1})), rec(json!({"id": 1})), rec(json!({"id": 2}))];
        let report = stage.evaluate(&records, &ids(3), &ctx(&stage, &records));
        assert_eq!(report.scores, vec![0.0, 0.0, 1.0]);
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn partial_fields_weighted_and_thresholded() {
        let mut rule = QualityRule::new("c", QualityCheck::Completeness, ["a", "b"]);
        rule.threshold = 0.5;
        let mut heavy = QualityRule::new("e", QualityCheck::Completeness, ["c"]);
        heavy.weight = 2.0;
        let stage = QualityStage::new(&[rule, heavy]);
        let records = vec![rec(json!({"a": 1, "b": null, "c": null}))];
        let report = stage.evaluate(&records, &ids(1), &ctx(&stage, &records));
        // (1.0 * 0.5 + 2.0 * 0.0) / 3.0
        assert!((report.scores[0] - 0.5 / 3.0).abs() < 1e-9);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].rule_id.as_deref(), Some("e"));
        assert_eq!(report.outcomes[0].records_affected, 1);
    }

    #[test]
    fn broken_pattern_is_a_check_error() {
        let stage = QualityStage::new(&[QualityRule::new(
            "v",
            QualityCheck::Validity {
                allowed_values: vec![],
                pattern: Some("(".into()),
            },
            ["f"],
        )]);
        let records = vec![rec(json!({"f": "x"}))];
        let report = stage.evaluate(&records, &ids(1), &ctx(&stage, &records));
        assert!(report.scores[0].abs() < f64::EPSILON);
        assert_eq!(report.issues[0].issue_type, ISSUE_QUALITY_CHECK_ERROR);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut rule = QualityRule::new("c", QualityCheck::Completeness, ["a"]);
        rule.enabled = false;
        assert!(QualityStage::new(&[rule]).is_empty());
    }
}
