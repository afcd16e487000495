//! Governance pipeline results: per-rule outcomes, issues, and the batch verdict.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{ComplianceStatus, GovernanceStage, IssueSeverity};
use crate::errors::CoreError;

/// Issue type raised when a record scores below a quality rule's threshold.
pub const ISSUE_QUALITY_BELOW_THRESHOLD: &str = "quality_below_threshold";
/// Issue type raised when a quality rule cannot evaluate a record at all.
pub const ISSUE_QUALITY_CHECK_ERROR: &str = "quality_check_error";
pub const ISSUE_CLEANSING_ERROR: &str = "cleansing_error";
pub const ISSUE_VALIDATION_FAILED: &str = "validation_failed";
pub const ISSUE_MASKING_ERROR: &str = "masking_error";
/// Issue type raised when a record cannot be mapped onto the target fields.
pub const ISSUE_MAPPING_ERROR: &str = "mapping_error";

/// One problem found while governing a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Issue {
    pub issue_type: String,
    pub severity: IssueSeverity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Issue {
    #[must_use]
    pub fn new(
        issue_type: impl Into<String>,
        severity: IssueSeverity,
        record_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            issue_type: issue_type.into(),
            severity,
            description: description.into(),
            field: None,
            record_id: record_id.into(),
            rule_id: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    /// The stage error this issue records.
    #[must_use]
    pub fn to_stage_error(&self, stage: GovernanceStage) -> CoreError {
        CoreError::Stage {
            stage: stage.as_str().to_string(),
            record_id: self.record_id.clone(),
            message: self.description.clone(),
        }
    }
}

/// Aggregate of one rule applied across a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub rule_name: String,
    pub rule_type: String,
    pub stage: GovernanceStage,
    pub records_evaluated: usize,
    /// Passed (quality) or modified (cleansing, masking).
    pub records_affected: usize,
    pub issues: usize,
    /// Mean pass fraction over scored records. Quality rules only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl RuleOutcome {
    #[must_use]
    pub fn new(
        stage: GovernanceStage,
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
        rule_type: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            rule_type: rule_type.into(),
            stage,
            records_evaluated: 0,
            records_affected: 0,
            issues: 0,
            score: None,
        }
    }

    /// Fold another partial outcome of the same rule into this one.
    ///
    /// Scores are combined weighted by `records_evaluated`.
    #[allow(clippy::cast_precision_loss)]
    pub fn absorb(&mut self, other: &Self) {
        let total = self.records_evaluated + other.records_evaluated;
        self.score = match (self.score, other.score) {
            (Some(a), Some(b)) if total > 0 => Some(
                a.mul_add(
                    self.records_evaluated as f64,
                    b * other.records_evaluated as f64,
                ) / total as f64,
            ),
            (a, b) => a.or(b),
        };
        self.records_evaluated = total;
        self.records_affected += other.records_affected;
        self.issues += other.issues;
    }
}

/// Result of one governance pipeline call over a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GovernanceResult {
    pub quality: Vec<RuleOutcome>,
    pub cleansing: Vec<RuleOutcome>,
    pub masking: Vec<RuleOutcome>,
    /// 0..=100.
    pub overall_quality_score: f64,
    pub total_processed_records: usize,
    pub total_cleansing_applied: usize,
    pub total_masking_applied: usize,
    pub total_validation_errors: usize,
    pub execution_time_ms: u64,
    pub compliance_status: ComplianceStatus,
    pub issues: Vec<Issue>,
}

impl Default for GovernanceResult {
    fn default() -> Self {
        Self {
            quality: Vec::new(),
            cleansing: Vec::new(),
            masking: Vec::new(),
            overall_quality_score: 100.0,
            total_processed_records: 0,
            total_cleansing_applied: 0,
            total_masking_applied: 0,
            total_validation_errors: 0,
            execution_time_ms: 0,
            compliance_status: ComplianceStatus::Compliant,
            issues: Vec::new(),
        }
    }
}

impl GovernanceResult {
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.compliance_status == ComplianceStatus::Compliant
    }

    /// Issues raised against one record.
    pub fn issues_for<'a>(&'a self, record_id: &'a str) -> impl Iterator<Item = &'a Issue> {
        self.issues.iter().filter(move |i| i.record_id == record_id)
    }
}
