//! Sync task update builder.

use chrono::{DateTime, Utc};
use hub_core::rules::governance::{
    CleansingRule, GovernanceExecutionConfig, MaskingRule, QualityRule,
};
use hub_core::rules::mapping::{FieldMappingRules, KeyMatchingRules};
use hub_core::rules::source::DataSourceConfig;
use hub_core::schedule::ScheduleConfig;
use serde::{Deserialize, Serialize};

/// Partial update of a sync task's definition.
///
/// Status is not here: it only moves through
/// [`HubService::transition_sync_task`](crate::service::HubService::transition_sync_task).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncTaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_matching: Option<KeyMatchingRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_mapping: Option<FieldMappingRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_rules: Option<Vec<QualityRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleansing_rules: Option<Vec<CleansingRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masking_rules: Option<Vec<MaskingRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceExecutionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_time: Option<Option<DateTime<Utc>>>,
}

impl SyncTaskUpdate {
    /// Whether any schedule-affecting field is set.
    #[must_use]
    pub const fn touches_schedule(&self) -> bool {
        self.schedule.is_some()
    }
}

pub struct SyncTaskUpdateBuilder(SyncTaskUpdate);

impl SyncTaskUpdateBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self(SyncTaskUpdate::default())
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.0.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: Option<String>) -> Self {
        self.0.description = Some(description);
        self
    }

    #[must_use]
    pub fn data_source(mut self, data_source: DataSourceConfig) -> Self {
        self.0.data_source = Some(data_source);
        self
    }

    #[must_use]
    pub fn key_matching(mut self, key_matching: KeyMatchingRules) -> Self {
        self.0.key_matching = Some(key_matching);
        self
    }

    #[must_use]
    pub fn field_mapping(mut self, field_mapping: FieldMappingRules) -> Self {
        self.0.field_mapping = Some(field_mapping);
        self
    }

    #[must_use]
    pub fn quality_rules(mut self, rules: Vec<QualityRule>) -> Self {
        self.0.quality_rules = Some(rules);
        self
    }

    #[must_use]
    pub fn cleansing_rules(mut self, rules: Vec<CleansingRule>) -> Self {
        self.0.cleansing_rules = Some(rules);
        self
    }

    #[must_use]
    pub fn masking_rules(mut self, rules: Vec<MaskingRule>) -> Self {
        self.0.masking_rules = Some(rules);
        self
    }

    #[must_use]
    pub fn governance(mut self, governance: GovernanceExecutionConfig) -> Self {
        self.0.governance = Some(governance);
        self
    }

    #[must_use]
    pub fn schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.0.schedule = Some(schedule);
        self
    }

    #[must_use]
    pub fn next_run_time(mut self, next_run_time: Option<DateTime<Utc>>) -> Self {
        self.0.next_run_time = Some(next_run_time);
        self
    }

    #[must_use]
    pub fn build(self) -> SyncTaskUpdate {
        self.0
    }
}

impl Default for SyncTaskUpdateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::schedule::TriggerSpec;

    #[test]
    fn only_set_fields_serialize() {
        let update = SyncTaskUpdateBuilder::new()
            .name("renamed")
            .description(None)
            .build();
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "renamed", "description": null})
        );
        assert!(!update.touches_schedule());
    }

    #[test]
    fn schedule_update_is_flagged() {
        let update = SyncTaskUpdateBuilder::new()
            .schedule(ScheduleConfig::new(TriggerSpec::Interval {
                interval_seconds: 60,
            }))
            .build();
        assert!(update.touches_schedule());
    }
}
