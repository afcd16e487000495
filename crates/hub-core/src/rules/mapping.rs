//! Field-mapping and key-matching documents.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Validate, require_fraction, require_identifier};

const fn default_true() -> bool {
    true
}

const fn default_weight() -> f64 {
    1.0
}

const fn default_threshold() -> f64 {
    0.8
}

// ---------------------------------------------------------------------------
// Field mapping
// ---------------------------------------------------------------------------

/// Named value transform applied while mapping a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValueTransform {
    Trim,
    Upper,
    Lower,
    ToString,
    ToNumber,
    ToInteger,
    ToBool,
}

/// Declared target type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[serde(alias = "varchar", alias = "text")]
    String,
    #[serde(alias = "int", alias = "bigint")]
    Integer,
    #[serde(alias = "double", alias = "number")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
    Timestamp,
    Json,
}

/// What happens to source fields no mapping mentions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedFields {
    #[default]
    Keep,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldMappingRule {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<ValueTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl FieldMappingRule {
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            transform: None,
            data_type: None,
            required: false,
            nullable: true,
            default_value: None,
        }
    }
}

impl Validate for FieldMappingRule {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        if self.source.trim().is_empty() {
            errors.push(format!("{path}.source: must not be empty"));
        }
        require_identifier(&format!("{path}.target"), &self.target, errors);
        if !self.nullable && self.default_value.as_ref().is_some_and(Value::is_null) {
            errors.push(format!(
                "{path}.default_value: null default on a non-nullable field"
            ));
        }
    }
}

/// Task-level field mapping applied after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldMappingRules {
    #[serde(default)]
    pub mappings: Vec<FieldMappingRule>,
    #[serde(default)]
    pub unmapped: UnmappedFields,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl Default for FieldMappingRules {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            unmapped: UnmappedFields::Keep,
            case_sensitive: true,
        }
    }
}

impl Validate for FieldMappingRules {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        self.mappings
            .validate_into(&format!("{path}.mappings"), errors);
        let mut seen = std::collections::HashSet::new();
        for (i, rule) in self.mappings.iter().enumerate() {
            if !seen.insert(rule.target.as_str()) {
                errors.push(format!(
                    "{path}.mappings[{i}].target: '{}' is mapped more than once",
                    rule.target
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Key matching
// ---------------------------------------------------------------------------

/// Per-field transform applied before key comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeyTransform {
    Trim,
    Upper,
    Lower,
    Hash,
    Normalize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyAlgorithm {
    #[default]
    Levenshtein,
    Jaro,
    Soundex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessing {
    Trim,
    Normalize,
    RemoveSpecial,
}

/// How colliding records that share one key are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the earliest record.
    #[default]
    First,
    /// Keep the latest record.
    Last,
    /// Overlay later non-null fields onto the earliest record.
    Merge,
    /// Fail the run.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PrimaryKeyRule {
    pub fields: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub transforms: BTreeMap<String, Vec<KeyTransform>>,
}

impl PrimaryKeyRule {
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            weight: default_weight(),
            transforms: BTreeMap::new(),
        }
    }
}

impl Validate for PrimaryKeyRule {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        if self.fields.is_empty() {
            errors.push(format!("{path}.fields: at least one field is required"));
        }
        for (i, field) in self.fields.iter().enumerate() {
            require_identifier(&format!("{path}.fields[{i}]"), field, errors);
        }
        if self.weight <= 0.0 || !self.weight.is_finite() {
            errors.push(format!("{path}.weight: must be a positive number"));
        }
        for field in self.transforms.keys() {
            if !self.fields.contains(field) {
                errors.push(format!(
                    "{path}.transforms: '{field}' is not one of the key fields"
                ));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FuzzyMatchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub algorithm: FuzzyAlgorithm,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_true")]
    pub case_ignore: bool,
    #[serde(default)]
    pub preprocessing: Vec<Preprocessing>,
}

impl Default for FuzzyMatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: FuzzyAlgorithm::default(),
            threshold: default_threshold(),
            fields: Vec::new(),
            case_ignore: true,
            preprocessing: Vec::new(),
        }
    }
}

impl Validate for FuzzyMatchConfig {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        require_fraction(&format!("{path}.threshold"), self.threshold, errors);
        for (i, field) in self.fields.iter().enumerate() {
            require_identifier(&format!("{path}.fields[{i}]"), field, errors);
        }
    }
}

/// Primary-key matching across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KeyMatchingRules {
    #[serde(default)]
    pub primary_keys: Vec<PrimaryKeyRule>,
    #[serde(default)]
    pub fuzzy: FuzzyMatchConfig,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default = "default_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl Default for KeyMatchingRules {
    fn default() -> Self {
        Self {
            primary_keys: Vec::new(),
            fuzzy: FuzzyMatchConfig::default(),
            conflict_policy: ConflictPolicy::default(),
            match_threshold: default_threshold(),
            case_sensitive: true,
        }
    }
}

impl KeyMatchingRules {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary_keys.is_empty()
    }
}

impl Validate for KeyMatchingRules {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        self.primary_keys
            .validate_into(&format!("{path}.primary_keys"), errors);
        self.fuzzy.validate_into(&format!("{path}.fuzzy"), errors);
        require_fraction(&format!("{path}.match_threshold"), self.match_threshold, errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn data_type_aliases() {
        let types: Vec<DataType> =
            serde_json::from_value(json!(["varchar", "bigint", "double", "bool", "text"])).unwrap();
        assert_eq!(
            types,
            vec![
                DataType::String,
                DataType::Integer,
                DataType::Float,
                DataType::Boolean,
                DataType::String
            ]
        );
    }

    #[test]
    fn field_mapping_defaults() {
        let rules: FieldMappingRules = serde_json::from_value(json!({
            "mappings": [{"source": "Name", "target": "name", "transform": "trim"}]
        }))
        .unwrap();
        assert_eq!(rules.unmapped, UnmappedFields::Keep);
        assert!(rules.mappings[0].nullable);
        assert!(rules.validate("field_mapping").is_ok());
    }

    #[test]
    fn duplicate_targets_rejected() {
        let rules = FieldMappingRules {
            mappings: vec![FieldMappingRule::new("a", "x"), FieldMappingRule::new("b", "x")],
            ..FieldMappingRules::default()
        };
        let err = rules.validate("field_mapping").unwrap_err();
        assert!(err.to_string().contains("mapped more than once"));
    }

    #[test]
    fn key_rule_transform_must_name_key_field() {
        let mut rule = PrimaryKeyRule::new(["id"]);
        rule.transforms.insert("email".into(), vec![KeyTransform::Lower]);
        let mut errors = Vec::new();
        rule.validate_into("pk", &mut errors);
        assert_eq!(errors.len(), 1, "{errors:?}");
    }

    #[test]
    fn key_matching_defaults() {
        let rules: KeyMatchingRules =
            serde_json::from_value(json!({"primary_keys": [{"fields": ["id"]}]})).unwrap();
        assert_eq!(rules.conflict_policy, ConflictPolicy::First);
        assert!((rules.match_threshold - 0.8).abs() < f64::EPSILON);
        assert!(!rules.fuzzy.enabled);
        assert!(rules.fuzzy.case_ignore);
    }
}
