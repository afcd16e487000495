//! # hub-engine
//!
//! The synchronization engine of the data hub.
//!
//! ## Pipeline
//!
//! One execution of a sync task flows through:
//! - [`extraction`]: SQL mode or interface mode with incremental watermarks
//! - [`mapping`]: field mapping, then key matching with optional fuzzy joins
//! - [`governance`]: Quality, then Cleansing, then Masking, per batch
//! - a [`source::RecordSink`] load and record-level lineage
//!
//! [`orchestrator::Orchestrator`] drives the phases, reports progress and
//! honours cancellation. [`tasks::TaskService`] is the entry point for
//! callers. [`reconciler::SchemaReconciler`] keeps physical tables and views
//! in line with their declared fields.
//!
//! ## Collaborators
//!
//! Catalog access, source reads and target writes sit behind
//! [`catalog::CatalogAdapter`], [`source::SourceReader`] and
//! [`source::RecordSink`]. In-memory implementations back the tests;
//! [`warehouse::LocalWarehouse`] implements all three over a local libSQL
//! file.

pub mod catalog;
pub mod extraction;
pub mod governance;
pub mod mapping;
pub mod orchestrator;
pub mod reconciler;
pub mod source;
pub mod tasks;
pub mod warehouse;

pub use orchestrator::{Orchestrator, SyncOptions, SyncProgress, SyncReport};
pub use reconciler::{ReconcileOutcome, SchemaReconciler};
pub use tasks::{StopOutcome, TaskService};
pub use warehouse::LocalWarehouse;
