//! Quality, cleansing, and masking rule documents.
//!
//! Each rule carries its type tag and type-specific parameters inline, e.g.
//! `{"id": "q1", "rule_type": "accuracy", "format": "email", "fields": ["email"]}`.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::source::FilterRule;
use super::{Validate, require_fraction, require_identifier, require_regex};

const fn default_true() -> bool {
    true
}

const fn default_weight() -> f64 {
    1.0
}

const fn default_batch_size() -> usize {
    1000
}

const fn default_timeout_seconds() -> u64 {
    300
}

const fn default_mask_char() -> char {
    '*'
}

const fn default_keep() -> usize {
    2
}

fn default_token_prefix() -> String {
    "tok_".into()
}

fn require_fields(path: &str, fields: &[String], errors: &mut Vec<String>) {
    if fields.is_empty() {
        errors.push(format!("{path}.fields: at least one field is required"));
    }
    for (i, field) in fields.iter().enumerate() {
        require_identifier(&format!("{path}.fields[{i}]"), field, errors);
    }
}

fn require_id(path: &str, id: &str, errors: &mut Vec<String>) {
    if id.trim().is_empty() {
        errors.push(format!("{path}.id: must not be empty"));
    }
}

// ---------------------------------------------------------------------------
// Quality
// ---------------------------------------------------------------------------

/// Well-known value formats for accuracy checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    Email,
    Phone,
    Date,
    Number,
    Url,
}

/// JSON kind expected by a consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Number,
    Integer,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum QualityCheck {
    /// Field is present and non-empty.
    Completeness,
    /// Field matches a format, a pattern, or a numeric range.
    Accuracy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<ValueFormat>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Field value is one of an allowed set or matches a pattern.
    Validity {
        #[serde(default)]
        allowed_values: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    /// Field value has the expected kind.
    Consistency { expected_type: ValueKind },
    /// Field value is not repeated elsewhere in the batch.
    Uniqueness,
    /// Timestamp field is no older than `max_age_hours`.
    Timeliness { max_age_hours: u32 },
}

impl QualityCheck {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completeness => "completeness",
            Self::Accuracy { .. } => "accuracy",
            Self::Validity { .. } => "validity",
            Self::Consistency { .. } => "consistency",
            Self::Uniqueness => "uniqueness",
            Self::Timeliness { .. } => "timeliness",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QualityRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub check: QualityCheck,
    pub fields: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Fraction of the rule's fields that must pass.
    #[serde(default = "default_weight")]
    pub threshold: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl QualityRule {
    #[must_use]
    pub fn new<I, S>(id: impl Into<String>, check: QualityCheck, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            check,
            fields: fields.into_iter().map(Into::into).collect(),
            weight: default_weight(),
            threshold: default_weight(),
            enabled: true,
        }
    }
}

impl Validate for QualityRule {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        require_id(path, &self.id, errors);
        require_fields(path, &self.fields, errors);
        require_fraction(&format!("{path}.threshold"), self.threshold, errors);
        if self.weight <= 0.0 || !self.weight.is_finite() {
            errors.push(format!("{path}.weight: must be a positive number"));
        }
        match &self.check {
            QualityCheck::Accuracy {
                format,
                pattern,
                min,
                max,
            } => {
                if let Some(pattern) = pattern {
                    require_regex(&format!("{path}.pattern"), pattern, errors);
                }
                if format.is_none() && pattern.is_none() && min.is_none() && max.is_none() {
                    errors.push(format!(
                        "{path}: accuracy needs a format, pattern, min or max"
                    ));
                }
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        errors.push(format!("{path}.min: {lo} is greater than max {hi}"));
                    }
                }
            }
            QualityCheck::Validity {
                allowed_values,
                pattern,
            } => {
                if let Some(pattern) = pattern {
                    require_regex(&format!("{path}.pattern"), pattern, errors);
                }
                if allowed_values.is_empty() && pattern.is_none() {
                    errors.push(format!(
                        "{path}: validity needs allowed_values or a pattern"
                    ));
                }
            }
            QualityCheck::Timeliness { max_age_hours } if *max_age_hours == 0 => {
                errors.push(format!("{path}.max_age_hours: must be at least 1"));
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Cleansing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TextCase {
    Upper,
    Lower,
    Title,
}

/// What a `validate` cleansing rule does with a non-matching value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvalidValueAction {
    #[default]
    SetNull,
    SetDefault,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum CleansingAction {
    Trim,
    Standardize {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        case: Option<TextCase>,
        /// Exact-value replacements, e.g. `{"M": "male"}`.
        #[serde(default)]
        mapping: BTreeMap<String, String>,
        #[serde(default)]
        collapse_whitespace: bool,
    },
    Replace {
        pattern: String,
        #[serde(default)]
        replacement: String,
    },
    Validate {
        pattern: String,
        #[serde(default)]
        on_invalid: InvalidValueAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<Value>,
    },
    /// Drop repeated characters within a value, keeping the first of each.
    RemoveDuplicates,
}

impl CleansingAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trim => "trim",
            Self::Standardize { .. } => "standardize",
            Self::Replace { .. } => "replace",
            Self::Validate { .. } => "validate",
            Self::RemoveDuplicates => "remove_duplicates",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CleansingRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub action: CleansingAction,
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FilterRule>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl CleansingRule {
    #[must_use]
    pub fn new<I, S>(id: impl Into<String>, action: CleansingAction, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            action,
            fields: fields.into_iter().map(Into::into).collect(),
            condition: None,
            priority: 0,
            enabled: true,
        }
    }
}

impl Validate for CleansingRule {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        require_id(path, &self.id, errors);
        require_fields(path, &self.fields, errors);
        self.condition
            .validate_into(&format!("{path}.condition"), errors);
        match &self.action {
            CleansingAction::Replace { pattern, .. } => {
                require_regex(&format!("{path}.pattern"), pattern, errors);
            }
            CleansingAction::Validate {
                pattern,
                on_invalid,
                default_value,
            } => {
                require_regex(&format!("{path}.pattern"), pattern, errors);
                if *on_invalid == InvalidValueAction::SetDefault && default_value.is_none() {
                    errors.push(format!(
                        "{path}.default_value: required when on_invalid is set_default"
                    ));
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Masking
// ---------------------------------------------------------------------------

/// Shape of the value being anonymized or pseudonymized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveKind {
    Name,
    Email,
    Phone,
    #[default]
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "masking_type", rename_all = "snake_case")]
pub enum MaskingStrategy {
    /// Keep `prefix_length` and `suffix_length` characters, mask the rest.
    /// Both zero masks the whole value.
    Mask {
        #[serde(default = "default_keep")]
        prefix_length: usize,
        #[serde(default = "default_keep")]
        suffix_length: usize,
        #[serde(default = "default_mask_char")]
        mask_char: char,
    },
    /// Salted SHA-256, hex encoded.
    Hash {
        #[serde(default)]
        salt: String,
    },
    /// ChaCha20-Poly1305 under a key derived from `key`; the stored text is
    /// base64 of nonce followed by ciphertext and can be decrypted back.
    Encrypt { key: String },
    /// Deterministic opaque token.
    Tokenize {
        #[serde(default = "default_token_prefix")]
        prefix: String,
    },
    Anonymize {
        #[serde(default)]
        kind: SensitiveKind,
    },
    /// Stable, realistic-looking substitute derived from the value's hash.
    Pseudonymize {
        #[serde(default)]
        kind: SensitiveKind,
    },
}

impl MaskingStrategy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mask { .. } => "mask",
            Self::Hash { .. } => "hash",
            Self::Encrypt { .. } => "encrypt",
            Self::Tokenize { .. } => "tokenize",
            Self::Anonymize { .. } => "anonymize",
            Self::Pseudonymize { .. } => "pseudonymize",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MaskingRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub fields: Vec<String>,
    #[serde(flatten)]
    pub strategy: MaskingStrategy,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl MaskingRule {
    #[must_use]
    pub fn new<I, S>(id: impl Into<String>, strategy: MaskingStrategy, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            fields: fields.into_iter().map(Into::into).collect(),
            strategy,
            priority: 0,
            enabled: true,
        }
    }
}

impl Validate for MaskingRule {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        require_id(path, &self.id, errors);
        require_fields(path, &self.fields, errors);
        if let MaskingStrategy::Encrypt { key } = &self.strategy {
            if key.is_empty() {
                errors.push(format!("{path}.key: must not be empty"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Execution toggles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GovernanceExecutionConfig {
    #[serde(default = "default_true")]
    pub enable_quality_check: bool,
    #[serde(default = "default_true")]
    pub enable_cleansing: bool,
    #[serde(default = "default_true")]
    pub enable_masking: bool,
    #[serde(default)]
    pub stop_on_quality_failure: bool,
    /// Minimum overall score (0..=100) when `stop_on_quality_failure` is set.
    #[serde(default)]
    pub quality_threshold: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for GovernanceExecutionConfig {
    fn default() -> Self {
        Self {
            enable_quality_check: true,
            enable_cleansing: true,
            enable_masking: true,
            stop_on_quality_failure: false,
            quality_threshold: 0.0,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Validate for GovernanceExecutionConfig {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        if !(0.0..=100.0).contains(&self.quality_threshold) {
            errors.push(format!(
                "{path}.quality_threshold: {} must be between 0 and 100",
                self.quality_threshold
            ));
        }
        if self.batch_size == 0 {
            errors.push(format!("{path}.batch_size: must be at least 1"));
        }
        if self.timeout_seconds == 0 {
            errors.push(format!("{path}.timeout_seconds: must be at least 1"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parse_document;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn quality_rule_parameters_are_inline() {
        let rule: QualityRule = serde_json::from_value(json!({
            "id": "q-email",
            "rule_type": "accuracy",
            "format": "email",
            "fields": ["email"]
        }))
        .unwrap();
        assert_eq!(
            rule.check,
            QualityCheck::Accuracy {
                format: Some(ValueFormat::Email),
                pattern: None,
                min: None,
                max: None
            }
        );
        assert!(rule.enabled);
        assert!((rule.threshold - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unit_variants_need_only_the_tag() {
        let rules: Vec<QualityRule> = parse_document(
            "quality_rules",
            r#"[{"id": "c", "rule_type": "completeness", "fields": ["name"]},
                {"id": "u", "rule_type": "uniqueness", "fields": ["id"]}]"#,
        )
        .unwrap();
        assert_eq!(rules[0].check, QualityCheck::Completeness);
        assert_eq!(rules[1].check.as_str(), "uniqueness");
    }

    #[test]
    fn unknown_rule_type_is_a_validation_error() {
        let err = parse_document::<Vec<QualityRule>>(
            "quality_rules",
            r#"[{"id": "x", "rule_type": "vibes", "fields": ["a"]}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("quality_rules"));
    }

    #[test]
    fn bad_regex_reported_with_path() {
        let err = parse_document::<Vec<CleansingRule>>(
            "cleansing_rules",
            r#"[{"id": "r", "rule_type": "replace", "pattern": "(", "fields": ["a"]}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cleansing_rules[0].pattern"), "{err}");
    }

    #[test]
    fn mask_defaults() {
        let rule: MaskingRule = serde_json::from_value(json!({
            "id": "m", "masking_type": "mask", "fields": ["phone"]
        }))
        .unwrap();
        assert_eq!(
            rule.strategy,
            MaskingStrategy::Mask {
                prefix_length: 2,
                suffix_length: 2,
                mask_char: '*'
            }
        );
    }

    #[test]
    fn governance_defaults_enable_every_stage() {
        let cfg: GovernanceExecutionConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg, GovernanceExecutionConfig::default());
        assert!(cfg.enable_quality_check && cfg.enable_cleansing && cfg.enable_masking);
    }

    #[test]
    fn governance_threshold_range() {
        let cfg = GovernanceExecutionConfig {
            quality_threshold: 120.0,
            ..GovernanceExecutionConfig::default()
        };
        assert!(cfg.validate("governance").is_err());
    }
}
