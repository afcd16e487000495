//! Cleansing stage: rewrites field values, highest priority rule first.

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;

use hub_core::enums::{GovernanceStage, IssueSeverity};
use hub_core::governance::{ISSUE_CLEANSING_ERROR, ISSUE_VALIDATION_FAILED, Issue, RuleOutcome};
use hub_core::rules::governance::{CleansingAction, CleansingRule, InvalidValueAction, TextCase};
use hub_core::value::{Record, value_as_string};

use super::StageReport;

#[derive(Debug)]
struct CompiledRule {
    rule: CleansingRule,
    pattern: Result<Option<Regex>, String>,
}

/// Enabled cleansing rules in application order.
#[derive(Debug)]
pub struct CleansingStage {
    rules: Vec<CompiledRule>,
}

enum FieldResult {
    Unchanged,
    Changed(Value),
    Invalid(Value),
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl CleansingStage {
    #[must_use]
    pub fn new(rules: &[CleansingRule]) -> Self {
        let mut enabled: Vec<&CleansingRule> = rules.iter().filter(|r| r.enabled).collect();
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            rules: enabled
                .into_iter()
                .map(|rule| {
                    let raw = match &rule.action {
                        CleansingAction::Replace { pattern, .. }
                        | CleansingAction::Validate { pattern, .. } => Some(pattern.as_str()),
                        _ => None,
                    };
                    CompiledRule {
                        rule: rule.clone(),
                        pattern: raw
                            .map(Regex::new)
                            .transpose()
                            .map_err(|e| format!("invalid pattern: {e}")),
                    }
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule ids in the order they are applied.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.rules.iter().map(|c| c.rule.id.as_str()).collect()
    }

    #[must_use]
    pub fn apply(&self, records: Vec<Record>, ids: &[String]) -> StageReport {
        let mut report = StageReport::new(
            self.rules
                .iter()
                .map(|c| {
                    RuleOutcome::new(
                        GovernanceStage::Cleansing,
                        &c.rule.id,
                        &c.rule.name,
                        c.rule.action.as_str(),
                    )
                })
                .collect(),
        );

        for (mut record, id) in records.into_iter().zip(ids) {
            let mut fired = false;
            for (compiled, outcome) in self.rules.iter().zip(report.outcomes.iter_mut()) {
                let rule = &compiled.rule;
                if rule.condition.as_ref().is_some_and(|c| !c.matches(&record)) {
                    continue;
                }
                outcome.records_evaluated += 1;

                let pattern = match &compiled.pattern {
                    Ok(pattern) => pattern.as_ref(),
                    Err(message) => {
                        outcome.issues += 1;
                        report.issues.push(
                            Issue::new(ISSUE_CLEANSING_ERROR, IssueSeverity::Error, id, message)
                                .with_rule(&rule.id),
                        );
                        continue;
                    }
                };

                let mut modified = false;
                for field in &rule.fields {
                    let Some(value) = record.get(field).filter(|v| !v.is_null()) else {
                        continue;
                    };
                    match clean_value(rule, pattern, value) {
                        FieldResult::Unchanged => {}
                        FieldResult::Changed(new) => {
                            record.insert(field.clone(), new);
                            modified = true;
                        }
                        FieldResult::Invalid(new) => {
                            outcome.issues += 1;
                            report.issues.push(
                                Issue::new(
                                    ISSUE_VALIDATION_FAILED,
                                    IssueSeverity::Warning,
                                    id,
                                    format!("value does not match rule '{}'", rule.name),
                                )
                                .with_field(field)
                                .with_rule(&rule.id),
                            );
                            if record.get(field) != Some(&new) {
                                record.insert(field.clone(), new);
                                modified = true;
                            }
                        }
                    }
                }
                if modified {
                    outcome.records_affected += 1;
                    fired = true;
                }
            }
            if fired {
                report.applied += 1;
            }
            report.records.push(record);
        }
        report
    }
}

fn changed(old: &Value, new: String) -> FieldResult {
    if old.as_str() == Some(new.as_str()) {
        FieldResult::Unchanged
    } else {
        FieldResult::Changed(Value::String(new))
    }
}

fn clean_value(rule: &CleansingRule, pattern: Option<&Regex>, value: &Value) -> FieldResult {
    let text = value_as_string(value).unwrap_or_default();
    match &rule.action {
        CleansingAction::Trim => match value {
            Value::String(s) => changed(value, s.trim().to_string()),
            _ => FieldResult::Unchanged,
        },
        CleansingAction::Standardize {
            case,
            mapping,
            collapse_whitespace,
        } => {
            let mut out = mapping.get(&text).cloned().unwrap_or(text);
            if *collapse_whitespace {
                out = out.split_whitespace().collect::<Vec<_>>().join(" ");
            }
            out = match case {
                Some(TextCase::Upper) => out.to_uppercase(),
                Some(TextCase::Lower) => out.to_lowercase(),
                Some(TextCase::Title) => title_case(&out),
                None => out,
            };
            if !value.is_string() && value_as_string(value).as_deref() == Some(out.as_str()) {
                return FieldResult::Unchanged;
            }
            changed(value, out)
        }
        CleansingAction::Replace { replacement, .. } => match pattern {
            Some(re) if re.is_match(&text) => {
                changed(value, re.replace_all(&text, replacement.as_str()).into_owned())
            }
            _ => FieldResult::Unchanged,
        },
        CleansingAction::Validate {
            on_invalid,
            default_value,
            ..
        } => {
            if pattern.is_none_or(|re| re.is_match(&text)) {
                return FieldResult::Unchanged;
            }
            FieldResult::Invalid(match on_invalid {
                InvalidValueAction::SetNull => Value::Null,
                InvalidValueAction::SetDefault => default_value.clone().unwrap_or(Value::Null),
                InvalidValueAction::Keep => value.clone(),
            })
        }
        CleansingAction::RemoveDuplicates => {
            let mut seen = HashSet::new();
            let out: String = text.chars().filter(|c| seen.insert(*c)).collect();
            if out == text {
                FieldResult::Unchanged
            } else {
                FieldResult::Changed(Value::String(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::rules::source::{FilterOperator, FilterRule};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn run(rules: &[CleansingRule], records: Vec<Record>) -> StageReport {
        let ids: Vec<String> = (0..records.len()).map(|i| format!("r{i}")).collect();
        CleansingStage::new(rules).apply(records, &ids)
    }

    #[test]
    fn priority_orders_rules() {
        let mut low = CleansingRule::new("low", CleansingAction::Trim, ["name"]);
        low.priority = 1;
        let mut high = CleansingRule::new(
            "high",
            CleansingAction::Replace {
                pattern: "x".into(),
                replacement: "y".into(),
            },
            ["name"],
        );
        high.priority = 9;
        assert_eq!(CleansingStage::new(&[low, high]).order(), vec!["high", "low"]);
    }

    #[test]
    fn counts_records_where_a_rule_fired() {
        let rules = [CleansingRule::new("t", CleansingAction::Trim, ["name"])];
        let report = run(&rules, vec![rec(json!({"name": " a "})), rec(json!({"name": "b"}))]);
        assert_eq!(report.applied, 1);
        assert_eq!(report.outcomes[0].records_evaluated, 2);
        assert_eq!(report.outcomes[0].records_affected, 1);
        assert_eq!(report.records[0]["name"], json!("a"));
    }

    #[test]
    fn standardize_maps_collapses_and_cases() {
        let rules = [CleansingRule::new(
            "s",
            CleansingAction::Standardize {
                case: Some(TextCase::Title),
                mapping: [("M".to_string(), "male".to_string())].into(),
                collapse_whitespace: true,
            },
            ["gender", "city"],
        )];
        let report = run(&rules, vec![rec(json!({"gender": "M", "city": "new   york"}))]);
        assert_eq!(report.records[0], rec(json!({"gender": "Male", "city": "New York"})));
    }

    #[test]
    fn validate_reports_and_applies_fallback() {
        let rules = [CleansingRule::new(
            "v",
            CleansingAction::Validate {
                pattern: r"^\d{6}$".into(),
                on_invalid: InvalidValueAction::SetDefault,
                default_value: Some(json!("000000")),
            },
            ["zip"],
        )];
        let report = run(&rules, vec![rec(json!({"zip": "12ab"})), rec(json!({"zip": "100000"}))]);
        assert_eq!(report.records[0]["zip"], json!("000000"));
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].issue_type, ISSUE_VALIDATION_FAILED);
        assert_eq!(report.issues[0].field.as_deref(), Some("zip"));
    }

    #[test]
    fn condition_limits_the_rule() {
        let mut rule = CleansingRule::new("t", CleansingAction::Trim, ["name"]);
        rule.condition = Some(FilterRule::new("country", FilterOperator::Eq, json!("CN")));
        let report = run(
            &[rule],
            vec![
                rec(json!({"name": " a ", "country": "CN"})),
                rec(json!({"name": " b ", "country": "US"})),
            ],
        );
        assert_eq!(report.records[0]["name"], json!("a"));
        assert_eq!(report.records[1]["name"], json!(" b "));
        assert_eq!(report.outcomes[0].records_evaluated, 1);
    }

    #[test]
    fn remove_duplicates_keeps_first_of_each_char() {
        let rules = [CleansingRule::new("d", CleansingAction::RemoveDuplicates, ["tag", "code"])];
        let report = run(
            &rules,
            vec![
                rec(json!({"tag": "aabbcc", "code": 1122})),
                rec(json!({"tag": "aabbcc", "code": "xyz"})),
            ],
        );
        assert_eq!(report.records[0], rec(json!({"tag": "abc", "code": "12"})));
        assert_eq!(report.records[1], rec(json!({"tag": "abc", "code": "xyz"})));
        assert_eq!(report.outcomes[0].records_affected, 2);
    }
}
