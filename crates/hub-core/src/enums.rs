//! Status enums and lifecycle types for the data hub.
//!
//! All enums use `snake_case` serialization via `#[serde(rename_all = "snake_case")]`.
//! Status enums with state machines provide `allowed_next_states()` to enforce
//! valid transitions at the application layer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// SyncTaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a sync task.
///
/// ```text
/// draft     → active | running | stopped
/// active    → running | stopped | completed
/// running   → active | failed | completed | stopped
/// failed    → active | running | stopped
/// stopped   → active
/// completed → active
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncTaskStatus {
    Draft,
    Active,
    Running,
    Stopped,
    Completed,
    Failed,
}

impl SyncTaskStatus {
    /// Valid next states from the current state.
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::Active, Self::Running, Self::Stopped],
            Self::Active => &[Self::Running, Self::Stopped, Self::Completed],
            Self::Running => &[Self::Active, Self::Failed, Self::Completed, Self::Stopped],
            Self::Failed => &[Self::Active, Self::Running, Self::Stopped],
            Self::Stopped | Self::Completed => &[Self::Active],
        }
    }

    /// Check whether transitioning to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    /// Whether a new execution may start from this state.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Draft | Self::Active | Self::Failed)
    }

    /// Whether the scheduler registers triggers for tasks in this state.
    #[must_use]
    pub const fn is_schedulable(self) -> bool {
        matches!(self, Self::Active | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Status of a single execution record.
///
/// ```text
/// pending → running → success
///                   → failed
///                   → cancelled
/// ```
///
/// Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Success, Self::Failed, Self::Cancelled],
            Self::Success | Self::Failed | Self::Cancelled => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExecutionType
// ---------------------------------------------------------------------------

/// What initiated an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    Manual,
    Scheduled,
    Retry,
}

impl ExecutionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// InterfaceType
// ---------------------------------------------------------------------------

/// Physical shape of a thematic interface.
///
/// `Realtime` and `Batch` are backed by tables with structured fields;
/// `View` is backed by a SQL SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    Realtime,
    Batch,
    View,
}

impl InterfaceType {
    #[must_use]
    pub const fn is_view(self) -> bool {
        matches!(self, Self::View)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Batch => "batch",
            Self::View => "view",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RecordStatus
// ---------------------------------------------------------------------------

/// Soft status of metadata rows (libraries, interfaces, flow graphs).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Active,
    Inactive,
}

impl RecordStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SyncPhase
// ---------------------------------------------------------------------------

/// Ordered phases of one orchestrated execution.
///
/// Each phase maps to a fixed progress floor so reported percentages never
/// move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Initialize,
    Extract,
    Map,
    MatchKeys,
    Govern,
    Load,
    Lineage,
    Complete,
}

impl SyncPhase {
    /// Progress percentage reported when the phase begins.
    #[must_use]
    pub const fn progress_floor(self) -> u8 {
        match self {
            Self::Initialize => 0,
            Self::Extract => 5,
            Self::Map => 30,
            Self::MatchKeys => 40,
            Self::Govern => 50,
            Self::Load => 80,
            Self::Lineage => 90,
            Self::Complete => 100,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Extract => "extract",
            Self::Map => "map",
            Self::MatchKeys => "match_keys",
            Self::Govern => "govern",
            Self::Load => "load",
            Self::Lineage => "lineage",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GovernanceStage
// ---------------------------------------------------------------------------

/// The three governance stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceStage {
    Quality,
    Cleansing,
    Masking,
}

impl GovernanceStage {
    pub const ORDER: [Self; 3] = [Self::Quality, Self::Cleansing, Self::Masking];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Cleansing => "cleansing",
            Self::Masking => "masking",
        }
    }
}

impl fmt::Display for GovernanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// IssueSeverity / ComplianceStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

impl IssueSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch-level compliance verdict: compliant iff no issue was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
}

impl ComplianceStatus {
    #[must_use]
    pub const fn from_issue_count(issues: usize) -> Self {
        if issues == 0 {
            Self::Compliant
        } else {
            Self::NonCompliant
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Serde roundtrip tests ---

    macro_rules! test_serde_roundtrip {
        ($name:ident, $ty:ty, $variant:expr, $expected_str:expr) => {
            #[test]
            fn $name() {
                let val = $variant;
                let json = serde_json::to_string(&val).unwrap();
                assert_eq!(json, format!("\"{}\"", $expected_str));
                let recovered: $ty = serde_json::from_str(&json).unwrap();
                assert_eq!(recovered, val);
            }
        };
    }

    test_serde_roundtrip!(task_draft, SyncTaskStatus, SyncTaskStatus::Draft, "draft");
    test_serde_roundtrip!(task_failed, SyncTaskStatus, SyncTaskStatus::Failed, "failed");
    test_serde_roundtrip!(
        execution_cancelled,
        ExecutionStatus,
        ExecutionStatus::Cancelled,
        "cancelled"
    );
    test_serde_roundtrip!(
        execution_type_scheduled,
        ExecutionType,
        ExecutionType::Scheduled,
        "scheduled"
    );
    test_serde_roundtrip!(interface_view, InterfaceType, InterfaceType::View, "view");
    test_serde_roundtrip!(record_inactive, RecordStatus, RecordStatus::Inactive, "inactive");
    test_serde_roundtrip!(phase_match_keys, SyncPhase, SyncPhase::MatchKeys, "match_keys");
    test_serde_roundtrip!(
        compliance_non_compliant,
        ComplianceStatus,
        ComplianceStatus::NonCompliant,
        "non_compliant"
    );

    // --- State machine tests ---

    #[test]
    fn task_lifecycle_happy_path() {
        assert!(SyncTaskStatus::Draft.can_transition_to(SyncTaskStatus::Active));
        assert!(SyncTaskStatus::Active.can_transition_to(SyncTaskStatus::Running));
        assert!(SyncTaskStatus::Running.can_transition_to(SyncTaskStatus::Active));
        assert!(SyncTaskStatus::Running.can_transition_to(SyncTaskStatus::Failed));
    }

    #[test]
    fn running_task_cannot_restart() {
        assert!(!SyncTaskStatus::Running.can_transition_to(SyncTaskStatus::Running));
        assert!(!SyncTaskStatus::Running.can_start());
    }

    #[test]
    fn stopped_task_must_be_reactivated() {
        assert!(!SyncTaskStatus::Stopped.can_start());
        assert!(!SyncTaskStatus::Stopped.can_transition_to(SyncTaskStatus::Running));
        assert!(SyncTaskStatus::Stopped.can_transition_to(SyncTaskStatus::Active));
    }

    #[test]
    fn failed_tasks_stay_schedulable() {
        assert!(SyncTaskStatus::Failed.is_schedulable());
        assert!(SyncTaskStatus::Failed.can_start());
        assert!(!SyncTaskStatus::Draft.is_schedulable());
    }

    #[test]
    fn execution_terminal_states_are_final() {
        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
            assert!(status.allowed_next_states().is_empty());
        }
    }

    #[test]
    fn phase_progress_is_monotonic() {
        let phases = [
            SyncPhase::Initialize,
            SyncPhase::Extract,
            SyncPhase::Map,
            SyncPhase::MatchKeys,
            SyncPhase::Govern,
            SyncPhase::Load,
            SyncPhase::Lineage,
            SyncPhase::Complete,
        ];
        for pair in phases.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].progress_floor() < pair[1].progress_floor());
        }
    }

    #[test]
    fn compliance_from_issue_count() {
        assert_eq!(ComplianceStatus::from_issue_count(0), ComplianceStatus::Compliant);
        assert_eq!(ComplianceStatus::from_issue_count(3), ComplianceStatus::NonCompliant);
    }
}
