//! Data-source documents: raw SQL mode and structured interface mode.

use std::collections::BTreeMap;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::mapping::FieldMappingRule;
use super::{Validate, require_identifier};
use crate::value::{Record, compare_values, value_as_string};

const fn default_timeout_seconds() -> u64 {
    30
}

const fn default_max_rows() -> usize {
    10_000
}

const fn default_batch_size() -> usize {
    1000
}

const fn default_true() -> bool {
    true
}

/// Where a task reads from. SQL mode wins whenever `sql_queries` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DataSourceConfig {
    #[serde(default)]
    pub sql_queries: Vec<SqlQueryConfig>,
    #[serde(default)]
    pub source_libraries: Vec<SourceLibraryConfig>,
}

impl DataSourceConfig {
    #[must_use]
    pub fn uses_sql_mode(&self) -> bool {
        !self.sql_queries.is_empty()
    }

    /// Enabled source libraries, highest priority first.
    #[must_use]
    pub fn enabled_libraries(&self) -> Vec<&SourceLibraryConfig> {
        let mut libs: Vec<_> = self.source_libraries.iter().filter(|l| l.enabled).collect();
        libs.sort_by(|a, b| b.priority.cmp(&a.priority));
        libs
    }
}

impl Validate for DataSourceConfig {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        self.sql_queries
            .validate_into(&format!("{path}.sql_queries"), errors);
        self.source_libraries
            .validate_into(&format!("{path}.source_libraries"), errors);
    }
}

/// One raw SELECT with `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SqlQueryConfig {
    pub sql_query: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl SqlQueryConfig {
    #[must_use]
    pub fn new(sql_query: impl Into<String>) -> Self {
        Self {
            sql_query: sql_query.into(),
            parameters: BTreeMap::new(),
            timeout_seconds: default_timeout_seconds(),
            max_rows: default_max_rows(),
        }
    }
}

impl Validate for SqlQueryConfig {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        if self.sql_query.trim().is_empty() {
            errors.push(format!("{path}.sql_query: must not be empty"));
        }
        if self.timeout_seconds == 0 {
            errors.push(format!("{path}.timeout_seconds: must be at least 1"));
        }
        if self.max_rows == 0 {
            errors.push(format!("{path}.max_rows: must be at least 1"));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceLibraryConfig {
    pub library_id: String,
    pub interfaces: Vec<SourceInterfaceConfig>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Validate for SourceLibraryConfig {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        if self.library_id.trim().is_empty() {
            errors.push(format!("{path}.library_id: must not be empty"));
        }
        if self.interfaces.is_empty() {
            errors.push(format!("{path}.interfaces: at least one interface is required"));
        }
        self.interfaces
            .validate_into(&format!("{path}.interfaces"), errors);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceInterfaceConfig {
    pub interface_id: String,
    #[serde(default)]
    pub field_mapping: Vec<FieldMappingRule>,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default)]
    pub sort: Vec<SortField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental: Option<IncrementalConfig>,
}

impl SourceInterfaceConfig {
    #[must_use]
    pub fn new(interface_id: impl Into<String>) -> Self {
        Self {
            interface_id: interface_id.into(),
            field_mapping: Vec::new(),
            filters: Vec::new(),
            sort: Vec::new(),
            batch_size: None,
            incremental: None,
        }
    }

    /// Active incremental config, if any.
    #[must_use]
    pub fn active_incremental(&self) -> Option<&IncrementalConfig> {
        self.incremental.as_ref().filter(|inc| inc.enabled)
    }
}

impl Validate for SourceInterfaceConfig {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        require_identifier(&format!("{path}.interface_id"), &self.interface_id, errors);
        if self.batch_size == Some(0) {
            errors.push(format!("{path}.batch_size: must be at least 1"));
        }
        self.field_mapping
            .validate_into(&format!("{path}.field_mapping"), errors);
        self.filters.validate_into(&format!("{path}.filters"), errors);
        for (i, sort) in self.sort.iter().enumerate() {
            require_identifier(&format!("{path}.sort[{i}].field"), &sort.field, errors);
        }
        self.incremental
            .validate_into(&format!("{path}.incremental"), errors);
    }
}

// ---------------------------------------------------------------------------
// Filters and sorting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    #[serde(alias = "gte")]
    Ge,
    #[serde(alias = "lte")]
    Le,
    In,
    NotIn,
    Like,
    IsNull,
    NotNull,
}

impl FilterOperator {
    /// Operators that compare against a value.
    #[must_use]
    pub const fn needs_value(self) -> bool {
        !matches!(self, Self::IsNull | Self::NotNull)
    }
}

/// A structured predicate `field operator value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FilterRule {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl FilterRule {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate the predicate against an in-memory record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            FilterOperator::IsNull => actual.is_null(),
            FilterOperator::NotNull => !actual.is_null(),
            _ if actual.is_null() => false,
            FilterOperator::Eq => compare_values(actual, &self.value).is_eq(),
            FilterOperator::Ne => compare_values(actual, &self.value).is_ne(),
            FilterOperator::Gt => compare_values(actual, &self.value).is_gt(),
            FilterOperator::Lt => compare_values(actual, &self.value).is_lt(),
            FilterOperator::Ge => compare_values(actual, &self.value).is_ge(),
            FilterOperator::Le => compare_values(actual, &self.value).is_le(),
            FilterOperator::In => self.value_list().any(|v| compare_values(actual, v).is_eq()),
            FilterOperator::NotIn => !self.value_list().any(|v| compare_values(actual, v).is_eq()),
            FilterOperator::Like => match (value_as_string(actual), self.value.as_str()) {
                (Some(text), Some(pattern)) => like_matches(pattern, &text),
                _ => false,
            },
        }
    }

    fn value_list(&self) -> impl Iterator<Item = &Value> {
        self.value.as_array().into_iter().flatten()
    }
}

impl Validate for FilterRule {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        require_identifier(&format!("{path}.field"), &self.field, errors);
        match self.operator {
            FilterOperator::In | FilterOperator::NotIn if !self.value.is_array() => {
                errors.push(format!("{path}.value: '{:?}' needs an array", self.operator));
            }
            FilterOperator::Like if !self.value.is_string() => {
                errors.push(format!("{path}.value: 'like' needs a string pattern"));
            }
            op if op.needs_value() && self.value.is_null() => {
                errors.push(format!("{path}.value: operator '{op:?}' needs a value"));
            }
            _ => {}
        }
    }
}

/// SQL `LIKE` semantics: `%` matches any run, `_` one character.
#[must_use]
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).is_ok_and(|re| re.is_match(text))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

impl SortOrder {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

// ---------------------------------------------------------------------------
// Incremental sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalFieldType {
    #[default]
    Timestamp,
    Number,
    String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CompareOperator {
    #[default]
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl CompareOperator {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    /// Whether newer rows have larger values of the incremental field.
    #[must_use]
    pub const fn is_ascending(self) -> bool {
        matches!(self, Self::Gt | Self::Ge)
    }
}

/// Structured watermark configuration for one source interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IncrementalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub field: String,
    #[serde(default)]
    pub field_type: IncrementalFieldType,
    #[serde(default)]
    pub operator: CompareOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<String>,
    #[serde(default)]
    pub max_lookback_hours: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_value: Option<String>,
    #[serde(default)]
    pub sync_deleted_records: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl IncrementalConfig {
    #[must_use]
    pub fn new(field: impl Into<String>, field_type: IncrementalFieldType) -> Self {
        Self {
            enabled: true,
            field: field.into(),
            field_type,
            operator: CompareOperator::default(),
            last_sync_value: None,
            initial_value: None,
            max_lookback_hours: 0,
            deleted_field: None,
            deleted_value: None,
            sync_deleted_records: false,
            batch_size: default_batch_size(),
            timezone: None,
        }
    }
}

impl Validate for IncrementalConfig {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        require_identifier(&format!("{path}.field"), &self.field, errors);
        if let Some(deleted) = &self.deleted_field {
            require_identifier(&format!("{path}.deleted_field"), deleted, errors);
        }
        if self.batch_size == 0 {
            errors.push(format!("{path}.batch_size: must be at least 1"));
        }
        for (name, value) in [
            ("last_sync_value", &self.last_sync_value),
            ("initial_value", &self.initial_value),
        ] {
            let Some(value) = value else { continue };
            let ok = match self.field_type {
                IncrementalFieldType::Timestamp => crate::value::parse_timestamp(value).is_some(),
                IncrementalFieldType::Number => value.trim().parse::<f64>().is_ok(),
                IncrementalFieldType::String => true,
            };
            if !ok {
                errors.push(format!(
                    "{path}.{name}: '{value}' is not a valid {:?} value",
                    self.field_type
                ));
            }
        }
    }
}
