//! # hub-core
//!
//! Core types and error taxonomy for the data hub.
//!
//! This crate provides the foundational types shared across all hub crates:
//! - Entity structs for tasks, executions, lineage, and thematic metadata
//! - Status enums with state machine transitions
//! - Strongly-typed rule documents validated at the deserialization boundary
//! - Schedule triggers and next-run computation
//! - Dynamic record helpers and governance result types

pub mod entities;
pub mod enums;
pub mod errors;
pub mod governance;
pub mod ids;
pub mod rules;
pub mod schedule;
pub mod value;
