use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::governance::Issue;

/// Maps one produced thematic record back to the source record it came from.
/// Insert-only.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LineageRecord {
    pub id: String,
    pub task_id: String,
    pub execution_id: String,
    pub thematic_interface_id: String,
    pub thematic_record_id: String,
    pub source_library_id: Option<String>,
    pub source_interface_id: Option<String>,
    pub source_record_id: String,
    /// SHA-256 hex of the source record's canonical JSON.
    pub source_record_hash: String,
    pub processing_rules: serde_json::Value,
    pub quality_score: f64,
    pub quality_issues: Vec<Issue>,
    pub processed_at: DateTime<Utc>,
}
