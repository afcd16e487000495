//! Repository modules implementing persistence for all hub entities.
//!
//! Each module adds methods to `HubService` via `impl HubService` blocks.

pub mod execution;
pub mod interface;
pub mod library;
pub mod lineage;
pub mod lock;
pub mod sync_task;
