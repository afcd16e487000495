//! Entity structs for the data hub.
//!
//! Each entity maps to a table in the libSQL metadata store. All structs
//! derive `Serialize`, `Deserialize`, and `JsonSchema` for JSON roundtrip
//! and schema validation.

mod execution;
mod lineage;
mod sync_task;
mod thematic;

pub use execution::{ExecutionCounts, SyncExecution, TaskStatistics, TaskStatusReport};
pub use lineage::LineageRecord;
pub use sync_task::{NewSyncTask, SyncTask};
pub use thematic::{ApiInterface, DataFlowGraph, TableField, ThematicInterface, ThematicLibrary};
