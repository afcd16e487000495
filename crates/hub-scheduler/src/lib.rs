//! # hub-scheduler
//!
//! Runs sync tasks on their schedules.
//!
//! - [`trigger::Trigger`]: one abstraction over manual, one-shot, interval
//!   and cron triggers, each bounded by the schedule's active window
//! - [`lock::DistributedLock`]: the capability that keeps two instances from
//!   running the same task, with in-memory and store-backed implementations
//! - [`scheduler::Scheduler`]: an owned instance with `start`, `reload` and
//!   `stop`, driving the orchestrator for every due task

pub mod lock;
pub mod scheduler;
pub mod trigger;

pub use lock::{DbLock, DistributedLock, LockGuard, MemoryLock};
pub use scheduler::{ScheduledRun, Scheduler, SkipReason};
pub use trigger::{Trigger, TriggerKind};
