use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{ExecutionStatus, SyncTaskStatus};
use crate::rules::Validate;
use crate::rules::governance::{
    CleansingRule, GovernanceExecutionConfig, MaskingRule, QualityRule,
};
use crate::rules::mapping::{FieldMappingRules, KeyMatchingRules};
use crate::rules::source::DataSourceConfig;
use crate::schedule::ScheduleConfig;

/// A configured extract-govern-load job targeting one thematic interface.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SyncTask {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub library_id: String,
    pub interface_id: String,
    pub data_source: DataSourceConfig,
    pub key_matching: KeyMatchingRules,
    pub field_mapping: FieldMappingRules,
    pub quality_rules: Vec<QualityRule>,
    pub cleansing_rules: Vec<CleansingRule>,
    pub masking_rules: Vec<MaskingRule>,
    pub governance: GovernanceExecutionConfig,
    pub schedule: ScheduleConfig,
    pub status: SyncTaskStatus,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_status: Option<ExecutionStatus>,
    pub last_sync_message: Option<String>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a sync task. Everything except the name and target
/// defaults to an empty rule set and a manual schedule.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NewSyncTask {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub library_id: String,
    pub interface_id: String,
    #[serde(default)]
    pub data_source: DataSourceConfig,
    #[serde(default)]
    pub key_matching: KeyMatchingRules,
    #[serde(default)]
    pub field_mapping: FieldMappingRules,
    #[serde(default)]
    pub quality_rules: Vec<QualityRule>,
    #[serde(default)]
    pub cleansing_rules: Vec<CleansingRule>,
    #[serde(default)]
    pub masking_rules: Vec<MaskingRule>,
    #[serde(default)]
    pub governance: GovernanceExecutionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewSyncTask {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        library_id: impl Into<String>,
        interface_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            library_id: library_id.into(),
            interface_id: interface_id.into(),
            data_source: DataSourceConfig::default(),
            key_matching: KeyMatchingRules::default(),
            field_mapping: FieldMappingRules::default(),
            quality_rules: Vec::new(),
            cleansing_rules: Vec::new(),
            masking_rules: Vec::new(),
            governance: GovernanceExecutionConfig::default(),
            schedule: ScheduleConfig::default(),
            created_by: None,
        }
    }
}

impl Validate for NewSyncTask {
    fn validate_into(&self, path: &str, errors: &mut Vec<String>) {
        if self.name.trim().is_empty() {
            errors.push(format!("{path}.name: must not be empty"));
        }
        if self.interface_id.trim().is_empty() {
            errors.push(format!("{path}.interface_id: must not be empty"));
        }
        self.data_source
            .validate_into(&format!("{path}.data_source"), errors);
        self.key_matching
            .validate_into(&format!("{path}.key_matching"), errors);
        self.field_mapping
            .validate_into(&format!("{path}.field_mapping"), errors);
        self.quality_rules
            .validate_into(&format!("{path}.quality_rules"), errors);
        self.cleansing_rules
            .validate_into(&format!("{path}.cleansing_rules"), errors);
        self.masking_rules
            .validate_into(&format!("{path}.masking_rules"), errors);
        self.governance
            .validate_into(&format!("{path}.governance"), errors);
        self.schedule
            .validate_into(&format!("{path}.schedule"), errors);
    }
}
