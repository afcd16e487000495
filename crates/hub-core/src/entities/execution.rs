use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::SyncTask;
use crate::enums::{ExecutionStatus, ExecutionType};

/// Record counts of one execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ExecutionCounts {
    pub source_records: u64,
    pub processed_records: u64,
    pub inserted_records: u64,
    pub updated_records: u64,
    pub error_records: u64,
}

/// One run of a sync task. Created `running`, finalized once, then immutable.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SyncExecution {
    pub id: String,
    pub task_id: String,
    pub execution_type: ExecutionType,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    #[serde(flatten)]
    pub counts: ExecutionCounts,
    /// Run summary, including the governance result.
    pub result: Option<serde_json::Value>,
    pub error_details: Option<String>,
}

/// Aggregate run history of one task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TaskStatistics {
    pub task_id: String,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    pub average_duration_ms: f64,
    pub total_processed_records: u64,
    /// Percentage of finished runs that succeeded.
    pub success_rate: f64,
    pub recent_executions: Vec<SyncExecution>,
}

/// Task plus its latest run and whether a run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TaskStatusReport {
    pub task: SyncTask,
    pub last_execution: Option<SyncExecution>,
    pub in_flight: bool,
}
