//! Strongly-typed rule documents attached to sync tasks.
//!
//! Each rule category is persisted as one JSON document. Documents are
//! parsed and validated at the boundary via [`parse_document`], which reports
//! every field-level problem at once instead of degrading to "no rules".

pub mod governance;
pub mod mapping;
pub mod source;

use schemars::schema_for;
use serde::de::DeserializeOwned;

use crate::errors::CoreError;
use crate::schedule::ScheduleConfig;

/// Field-level validation of a rule document.
pub trait Validate {
    /// Append one message per problem, each prefixed with `path`.
    fn validate_into(&self, path: &str, errors: &mut Vec<String>);

    /// Validate and fold all problems into one `CoreError::Validation`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` listing every problem found.
    fn validate(&self, path: &str) -> Result<(), CoreError> {
        let mut errors = Vec::new();
        self.validate_into(path, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(errors.join("; ")))
        }
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        for (i, item) in self.iter().enumerate() {
            item.validate_into(&format!("{path}[{i}]"), errors);
        }
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        if let Some(inner) = self {
            inner.validate_into(path, errors);
        }
    }
}

impl Validate for ScheduleConfig {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        if let Err(CoreError::Validation(msg)) = self.validate() {
            errors.push(format!("{path}: {msg}"));
        }
    }
}

/// Parse a JSON rule document and validate it.
///
/// # Errors
///
/// Returns `CoreError::Validation` if the JSON does not match the document
/// shape or any field fails validation.
pub fn parse_document<T: DeserializeOwned + Validate>(
    category: &str,
    raw: &str,
) -> Result<T, CoreError> {
    let doc: T = serde_json::from_str(raw)
        .map_err(|e| CoreError::Validation(format!("{category}: {e}")))?;
    doc.validate(category)?;
    Ok(doc)
}

pub(crate) fn require_identifier(path: &str, name: &str, errors: &mut Vec<String>) {
    if !crate::ids::is_valid_identifier(name) {
        errors.push(format!("{path}: '{name}' is not a valid identifier"));
    }
}

pub(crate) fn require_fraction(path: &str, value: f64, errors: &mut Vec<String>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(format!("{path}: {value} must be between 0 and 1"));
    }
}

pub(crate) fn require_regex(path: &str, pattern: &str, errors: &mut Vec<String>) {
    if let Err(e) = regex::Regex::new(pattern) {
        errors.push(format!("{path}: invalid pattern: {e}"));
    }
}

/// Rule document categories, as addressed by the CLI `schema` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDocument {
    DataSource,
    KeyMatching,
    FieldMapping,
    QualityRules,
    CleansingRules,
    MaskingRules,
    Governance,
    Schedule,
}

impl RuleDocument {
    pub const ALL: [Self; 8] = [
        Self::DataSource,
        Self::KeyMatching,
        Self::FieldMapping,
        Self::QualityRules,
        Self::CleansingRules,
        Self::MaskingRules,
        Self::Governance,
        Self::Schedule,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataSource => "data_source",
            Self::KeyMatching => "key_matching",
            Self::FieldMapping => "field_mapping",
            Self::QualityRules => "quality_rules",
            Self::CleansingRules => "cleansing_rules",
            Self::MaskingRules => "masking_rules",
            Self::Governance => "governance",
            Self::Schedule => "schedule",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.replace('-', "_");
        Self::ALL.into_iter().find(|doc| doc.as_str() == name)
    }

    /// JSON Schema of the document.
    #[must_use]
    pub fn json_schema(self) -> serde_json::Value {
        let schema = match self {
            Self::DataSource => schema_for!(source::DataSourceConfig),
            Self::KeyMatching => schema_for!(mapping::KeyMatchingRules),
            Self::FieldMapping => schema_for!(mapping::FieldMappingRules),
            Self::QualityRules => schema_for!(Vec<governance::QualityRule>),
            Self::CleansingRules => schema_for!(Vec<governance::CleansingRule>),
            Self::MaskingRules => schema_for!(Vec<governance::MaskingRule>),
            Self::Governance => schema_for!(governance::GovernanceExecutionConfig),
            Self::Schedule => schema_for!(ScheduleConfig),
        };
        serde_json::to_value(schema).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::mapping::KeyMatchingRules;

    #[test]
    fn parse_document_reports_field_paths() {
        let raw = r#"{"primary_keys": [{"fields": []}], "match_threshold": 1.5}"#;
        let err = parse_document::<KeyMatchingRules>("key_matching", raw).unwrap_err();
        let CoreError::Validation(msg) = err else {
            panic!("expected validation error");
        };
        assert!(msg.contains("key_matching.primary_keys[0].fields"), "{msg}");
        assert!(msg.contains("key_matching.match_threshold"), "{msg}");
    }

    #[test]
    fn parse_document_rejects_malformed_json() {
        let err = parse_document::<KeyMatchingRules>("key_matching", "{not json").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn every_document_has_a_schema() {
        for doc in RuleDocument::ALL {
            assert!(doc.json_schema().is_object(), "{}", doc.as_str());
            assert_eq!(RuleDocument::from_name(doc.as_str()), Some(doc));
        }
        assert_eq!(
            RuleDocument::from_name("quality-rules"),
            Some(RuleDocument::QualityRules)
        );
    }
}
