//! Primary-key matching across sources.
//!
//! Records that resolve to the same entity are collapsed into one output
//! record according to the conflict policy. Exact rules go through a hash
//! index; fuzzy matching compares each record against every kept record.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use hub_core::errors::CoreError;
use hub_core::rules::mapping::{ConflictPolicy, KeyMatchingRules, KeyTransform, PrimaryKeyRule};
use hub_core::value::{Record, record_identifier, value_as_string};

use super::fuzzy::{preprocess, similarity};
use crate::extraction::{RecordOrigin, SourcedRecord};

/// One output entity after matching.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRecord {
    pub key: String,
    pub record: Record,
    /// Every source row folded into this entity.
    pub origins: Vec<RecordOrigin>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub records: Vec<MatchedRecord>,
    /// Input records that collided with an already-kept entity.
    pub conflicts: usize,
    /// Fields the loader upserts on.
    pub key_fields: Vec<String>,
}

fn apply_key_transform(transform: KeyTransform, value: &str) -> String {
    match transform {
        KeyTransform::Trim => value.trim().to_string(),
        KeyTransform::Upper => value.to_uppercase(),
        KeyTransform::Lower => value.to_lowercase(),
        KeyTransform::Hash => hex::encode(Sha256::digest(value.as_bytes())),
        KeyTransform::Normalize => value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
    }
}

/// Transformed text of one key field, `None` when missing or null.
fn key_part(
    rule: &PrimaryKeyRule,
    field: &str,
    record: &Record,
    case_sensitive: bool,
) -> Option<String> {
    let mut text = record.get(field).and_then(value_as_string)?;
    if !case_sensitive {
        text = text.to_lowercase();
    }
    for transform in rule.transforms.get(field).into_iter().flatten() {
        text = apply_key_transform(*transform, &text);
    }
    Some(text)
}

/// Exact key of a record under one rule, when every field is present.
fn rule_key(rule: &PrimaryKeyRule, record: &Record, case_sensitive: bool) -> Option<String> {
    let parts: Option<Vec<String>> = rule
        .fields
        .iter()
        .map(|field| key_part(rule, field, record, case_sensitive))
        .collect();
    parts.map(|parts| parts.join("|"))
}

/// Key of a record: the first applicable rule, else its natural identifier.
#[must_use]
pub fn record_key(rules: &KeyMatchingRules, record: &Record, index: usize) -> String {
    rules
        .primary_keys
        .iter()
        .find_map(|rule| rule_key(rule, record, rules.case_sensitive))
        .unwrap_or_else(|| record_identifier(record, index))
}

/// Agreement of two records on one rule, or `None` if the rule does not
/// apply to both.
fn rule_agreement(rules: &KeyMatchingRules, rule: &PrimaryKeyRule, a: &Record, b: &Record) -> Option<f64> {
    let fuzzy = &rules.fuzzy;
    let fuzzy_rule = fuzzy.enabled
        && (fuzzy.fields.is_empty() || rule.fields.iter().any(|f| fuzzy.fields.contains(f)));

    if !fuzzy_rule {
        let (x, y) = (
            rule_key(rule, a, rules.case_sensitive)?,
            rule_key(rule, b, rules.case_sensitive)?,
        );
        return Some(if x == y { 1.0 } else { 0.0 });
    }

    let mut total = 0.0;
    for field in &rule.fields {
        let x = key_part(rule, field, a, rules.case_sensitive)?;
        let y = key_part(rule, field, b, rules.case_sensitive)?;
        total += similarity(
            fuzzy.algorithm,
            &preprocess(&x, fuzzy),
            &preprocess(&y, fuzzy),
        );
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = total / rule.fields.len().max(1) as f64;
    Some(if mean >= fuzzy.threshold { mean } else { 0.0 })
}

/// Weighted match score of two records over the rules applicable to both.
#[must_use]
pub fn match_score(rules: &KeyMatchingRules, a: &Record, b: &Record) -> f64 {
    let mut weighted = 0.0;
    let mut weights = 0.0;
    for rule in &rules.primary_keys {
        if let Some(agreement) = rule_agreement(rules, rule, a, b) {
            weighted += rule.weight * agreement;
            weights += rule.weight;
        }
    }
    if weights > 0.0 { weighted / weights } else { 0.0 }
}

/// Collapses sourced records into matched entities.
pub struct KeyMatcher<'a> {
    rules: &'a KeyMatchingRules,
    kept: Vec<MatchedRecord>,
    /// Per rule: exact key → index into `kept`.
    index: Vec<HashMap<String, Vec<usize>>>,
    conflicts: usize,
}

impl<'a> KeyMatcher<'a> {
    #[must_use]
    pub fn new(rules: &'a KeyMatchingRules) -> Self {
        Self {
            rules,
            kept: Vec::new(),
            index: vec![HashMap::new(); rules.primary_keys.len()],
            conflicts: 0,
        }
    }

    fn candidate(&self, record: &Record) -> Option<usize> {
        let threshold = self.rules.match_threshold;
        if self.rules.fuzzy.enabled {
            return self
                .kept
                .iter()
                .enumerate()
                .map(|(i, kept)| (i, match_score(self.rules, &kept.record, record)))
                .filter(|(_, score)| *score >= threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);
        }

        let mut candidates: Vec<usize> = self
            .rules
            .primary_keys
            .iter()
            .zip(&self.index)
            .filter_map(|(rule, index)| index.get(&rule_key(rule, record, self.rules.case_sensitive)?))
            .flatten()
            .copied()
            .collect();
        candidates.sort_unstable();
        candidates.dedup();
        if self.rules.primary_keys.len() == 1 {
            return candidates.first().copied();
        }
        candidates
            .into_iter()
            .find(|&i| match_score(self.rules, &self.kept[i].record, record) >= threshold)
    }

    fn register(&mut self, position: usize) {
        let record = &self.kept[position].record;
        for (rule, index) in self.rules.primary_keys.iter().zip(self.index.iter_mut()) {
            if let Some(key) = rule_key(rule, record, self.rules.case_sensitive) {
                let slots = index.entry(key).or_default();
                if !slots.contains(&position) {
                    slots.push(position);
                }
            }
        }
    }

    fn unregister(&mut self, position: usize) {
        let record = &self.kept[position].record;
        for (rule, index) in self.rules.primary_keys.iter().zip(self.index.iter_mut()) {
            let Some(key) = rule_key(rule, record, self.rules.case_sensitive) else {
                continue;
            };
            if let Some(slots) = index.get_mut(&key) {
                slots.retain(|&slot| slot != position);
                if slots.is_empty() {
                    index.remove(&key);
                }
            }
        }
    }

    /// Fold one record in.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Conflict` on a collision under the `error` policy.
    pub fn push(&mut self, input: SourcedRecord) -> Result<(), CoreError> {
        let position = self.kept.len();
        let Some(existing) = self.candidate(&input.record) else {
            let key = record_key(self.rules, &input.record, position);
            self.kept.push(MatchedRecord {
                key,
                record: input.record,
                origins: input.origins,
            });
            self.register(position);
            return Ok(());
        };

        self.conflicts += 1;
        // Replacing or merging can change the kept record's keys.
        if matches!(self.rules.conflict_policy, ConflictPolicy::Last | ConflictPolicy::Merge) {
            self.unregister(existing);
        }
        let kept = &mut self.kept[existing];
        match self.rules.conflict_policy {
            ConflictPolicy::First => {}
            ConflictPolicy::Last => {
                kept.record = input.record;
                kept.origins = input.origins;
            }
            ConflictPolicy::Merge => {
                for (field, value) in input.record {
                    if !value.is_null() {
                        kept.record.insert(field, value);
                    }
                }
                for origin in input.origins {
                    if !kept.origins.contains(&origin) {
                        kept.origins.push(origin);
                    }
                }
            }
            ConflictPolicy::Error => {
                return Err(CoreError::Conflict(format!(
                    "records collide on key '{}'",
                    kept.key
                )));
            }
        }
        self.register(existing);
        Ok(())
    }

    #[must_use]
    pub fn finish(self) -> MatchOutcome {
        MatchOutcome {
            records: self.kept,
            conflicts: self.conflicts,
            key_fields: self
                .rules
                .primary_keys
                .first()
                .map(|rule| rule.fields.clone())
                .unwrap_or_default(),
        }
    }
}

/// Match a whole batch. With no key rules every record passes through.
///
/// # Errors
///
/// Returns `CoreError::Conflict` on a collision under the `error` policy.
pub fn match_records(
    rules: &KeyMatchingRules,
    records: Vec<SourcedRecord>,
) -> Result<MatchOutcome, CoreError> {
    if rules.is_empty() {
        return Ok(MatchOutcome {
            records: records
                .into_iter()
                .enumerate()
                .map(|(i, r)| MatchedRecord {
                    key: record_identifier(&r.record, i),
                    record: r.record,
                    origins: r.origins,
                })
                .collect(),
            conflicts: 0,
            key_fields: Vec::new(),
        });
    }
    let mut matcher = KeyMatcher::new(rules);
    for record in records {
        matcher.push(record)?;
    }
    Ok(matcher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::rules::mapping::{FuzzyAlgorithm, FuzzyMatchConfig};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn sourced(library: &str, value: Value) -> SourcedRecord {
        let record = value.as_object().cloned().unwrap();
        SourcedRecord {
            origins: vec![RecordOrigin {
                library_id: library.into(),
                interface_id: "people".into(),
                record_id: record_identifier(&record, 0),
            }],
            record,
            cursor: None,
        }
    }

    fn rules(policy: ConflictPolicy) -> KeyMatchingRules {
        KeyMatchingRules {
            primary_keys: vec![PrimaryKeyRule::new(["id"])],
            conflict_policy: policy,
            ..KeyMatchingRules::default()
        }
    }

    fn batch() -> Vec<SourcedRecord> {
        vec![
            sourced("crm", json!({"id": 1, "name": "Ada", "email": null})),
            sourced("hr", json!({"id": 1, "name": null, "email": "ada@example.com"})),
            sourced("crm", json!({"id": 2, "name": "Bob"})),
        ]
    }

    #[test]
    fn first_keeps_the_earliest() {
        let out = match_records(&rules(ConflictPolicy::First), batch()).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.conflicts, 1);
        assert_eq!(out.records[0].record["name"], json!("Ada"));
        assert_eq!(out.records[0].origins[0].library_id, "crm");
        assert_eq!(out.key_fields, vec!["id".to_string()]);
    }

    #[test]
    fn last_replaces_record_and_origins() {
        let out = match_records(&rules(ConflictPolicy::Last), batch()).unwrap();
        assert_eq!(out.records[0].record["email"], json!("ada@example.com"));
        assert_eq!(out.records[0].origins.len(), 1);
        assert_eq!(out.records[0].origins[0].library_id, "hr");
    }

    #[test]
    fn replaced_records_drop_their_old_keys() {
        let config = KeyMatchingRules {
            primary_keys: vec![PrimaryKeyRule::new(["email"]), PrimaryKeyRule::new(["phone"])],
            match_threshold: 0.5,
            conflict_policy: ConflictPolicy::Last,
            ..KeyMatchingRules::default()
        };
        let mut matcher = KeyMatcher::new(&config);
        matcher.push(sourced("a", json!({"email": "a@x.io", "phone": "1"}))).unwrap();
        matcher.push(sourced("b", json!({"email": "a@x.io", "phone": "2"}))).unwrap();
        assert!(!matcher.index[1].contains_key("1"));
        assert_eq!(matcher.index[1]["2"], vec![0]);
        assert_eq!(matcher.index[0]["a@x.io"], vec![0]);

        matcher.push(sourced("c", json!({"email": "c@x.io", "phone": "1"}))).unwrap();
        let out = matcher.finish();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[1].record["email"], json!("c@x.io"));
    }

    #[test]
    fn merge_overlays_non_null_fields() {
        let out = match_records(&rules(ConflictPolicy::Merge), batch()).unwrap();
        let merged = &out.records[0];
        assert_eq!(merged.record["name"], json!("Ada"));
        assert_eq!(merged.record["email"], json!("ada@example.com"));
        assert_eq!(merged.origins.len(), 2);
    }

    #[test]
    fn error_policy_fails_on_collision() {
        let err = match_records(&rules(ConflictPolicy::Error), batch()).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ref m) if m.contains("'1'")));
    }

    #[test]
    fn key_transforms_and_case_folding() {
        let mut rule = PrimaryKeyRule::new(["email"]);
        rule.transforms
            .insert("email".into(), vec![KeyTransform::Trim]);
        let config = KeyMatchingRules {
            primary_keys: vec![rule],
            case_sensitive: false,
            ..KeyMatchingRules::default()
        };
        let out = match_records(
            &config,
            vec![
                sourced("a", json!({"email": " Ada@Example.com"})),
                sourced("b", json!({"email": "ada@example.com "})),
            ],
        )
        .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].key, "ada@example.com");
    }

    #[test]
    fn weighted_rules_need_the_threshold() {
        let mut email = PrimaryKeyRule::new(["email"]);
        email.weight = 3.0;
        let config = KeyMatchingRules {
            primary_keys: vec![email, PrimaryKeyRule::new(["phone"])],
            match_threshold: 0.7,
            ..KeyMatchingRules::default()
        };
        let a = json!({"email": "a@x.io", "phone": "1"});
        let b = json!({"email": "a@x.io", "phone": "2"});
        let score = match_score(
            &config,
            a.as_object().unwrap(),
            b.as_object().unwrap(),
        );
        assert!((score - 0.75).abs() < 1e-9);

        let out = match_records(&config, vec![sourced("a", a), sourced("b", b)]).unwrap();
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn fuzzy_matches_near_duplicates() {
        let config = KeyMatchingRules {
            primary_keys: vec![PrimaryKeyRule::new(["name"])],
            fuzzy: FuzzyMatchConfig {
                enabled: true,
                algorithm: FuzzyAlgorithm::Levenshtein,
                threshold: 0.8,
                ..FuzzyMatchConfig::default()
            },
            ..KeyMatchingRules::default()
        };
        let out = match_records(
            &config,
            vec![
                sourced("a", json!({"name": "Jonathan Smith"})),
                sourced("b", json!({"name": "Jonathon Smith"})),
                sourced("c", json!({"name": "Mary Jones"})),
            ],
        )
        .unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.conflicts, 1);
    }

    #[test]
    fn no_rules_passes_everything_through() {
        let out = match_records(&KeyMatchingRules::default(), batch()).unwrap();
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.conflicts, 0);
        assert!(out.key_fields.is_empty());
    }
}
