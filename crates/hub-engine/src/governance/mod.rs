//! Governance pipeline: Quality → Cleansing → Masking over one batch.
//!
//! Each stage is a pure function from records to records plus diagnostics.
//! A record that fails a stage yields an [`Issue`] and keeps moving; nothing
//! short of a worker panic aborts the batch.
//!
//! The overall quality score is the sum of per-record quality scores divided
//! by the number of records in the batch, scaled to 0..=100. A record whose
//! evaluation errors contributes 0. With the stage disabled, no enabled
//! rules, or no records, the score is 100.

pub mod cleansing;
pub mod masking;
pub mod quality;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use hub_core::enums::ComplianceStatus;
use hub_core::errors::CoreError;
use hub_core::governance::{GovernanceResult, Issue, RuleOutcome};
use hub_core::rules::governance::{
    CleansingRule, GovernanceExecutionConfig, MaskingRule, QualityRule,
};
use hub_core::value::{Record, record_identifier, value_as_string};

pub use cleansing::CleansingStage;
pub use masking::MaskingStage;
pub use quality::{QualityReport, QualityStage};

/// Batch-wide state shared by every worker.
#[derive(Debug)]
pub struct BatchContext {
    pub now: DateTime<Utc>,
    /// field → value text → occurrences, for uniqueness checks.
    counts: HashMap<String, HashMap<String, usize>>,
}

impl BatchContext {
    #[must_use]
    pub fn new(now: DateTime<Utc>, quality: &QualityStage, records: &[Record]) -> Self {
        let mut counts: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for field in quality.uniqueness_fields() {
            if counts.contains_key(field) {
                continue;
            }
            let mut values = HashMap::new();
            for text in records.iter().filter_map(|r| r.get(field).and_then(value_as_string)) {
                *values.entry(text).or_insert(0) += 1;
            }
            counts.insert(field.to_string(), values);
        }
        Self { now, counts }
    }

    /// How many records in the batch carry `text` in `field`.
    #[must_use]
    pub fn occurrences(&self, field: &str, text: &str) -> usize {
        self.counts
            .get(field)
            .and_then(|values| values.get(text))
            .copied()
            .unwrap_or(0)
    }
}

/// Output of a record-rewriting stage over one slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub records: Vec<Record>,
    pub outcomes: Vec<RuleOutcome>,
    pub issues: Vec<Issue>,
    /// Records where at least one rule fired.
    pub applied: usize,
}

impl StageReport {
    #[must_use]
    pub const fn new(outcomes: Vec<RuleOutcome>) -> Self {
        Self {
            records: Vec::new(),
            outcomes,
            issues: Vec::new(),
            applied: 0,
        }
    }
}

/// The governed batch handed on to the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernedBatch {
    pub records: Vec<Record>,
    pub record_ids: Vec<String>,
    /// Per-record quality score in `0.0..=1.0`.
    pub scores: Vec<f64>,
    pub result: GovernanceResult,
}

impl GovernedBatch {
    /// Issues raised against the record at `index`.
    #[must_use]
    pub fn issues_for(&self, index: usize) -> Vec<Issue> {
        self.record_ids
            .get(index)
            .map(|id| self.result.issues_for(id).cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct ChunkResult {
    records: Vec<Record>,
    scores: Vec<f64>,
    quality: Option<QualityReport>,
    cleansing: Option<StageReport>,
    masking: Option<StageReport>,
}

/// Compiled governance rules of one task.
#[derive(Debug)]
pub struct GovernancePipeline {
    config: GovernanceExecutionConfig,
    quality: QualityStage,
    cleansing: CleansingStage,
    masking: MaskingStage,
}

impl GovernancePipeline {
    #[must_use]
    pub fn new(
        config: &GovernanceExecutionConfig,
        quality: &[QualityRule],
        cleansing: &[CleansingRule],
        masking: &[MaskingRule],
    ) -> Self {
        Self {
            config: config.clone(),
            quality: QualityStage::new(quality),
            cleansing: CleansingStage::new(cleansing),
            masking: MaskingStage::new(masking),
        }
    }

    fn quality_active(&self) -> bool {
        self.config.enable_quality_check && !self.quality.is_empty()
    }

    /// Run all enabled stages over one slice, in fixed order.
    fn run_chunk(&self, records: Vec<Record>, ids: &[String], ctx: &BatchContext) -> ChunkResult {
        let mut chunk = ChunkResult {
            scores: vec![1.0; records.len()],
            ..ChunkResult::default()
        };
        if self.quality_active() {
            let report = self.quality.evaluate(&records, ids, ctx);
            chunk.scores.clone_from(&report.scores);
            chunk.quality = Some(report);
        }
        let mut records = records;
        if self.config.enable_cleansing && !self.cleansing.is_empty() {
            let mut report = self.cleansing.apply(records, ids);
            records = std::mem::take(&mut report.records);
            chunk.cleansing = Some(report);
        }
        if self.config.enable_masking && !self.masking.is_empty() {
            let mut report = self.masking.apply(records, ids);
            records = std::mem::take(&mut report.records);
            chunk.masking = Some(report);
        }
        chunk.records = records;
        chunk
    }

    /// Govern a batch on the current task.
    #[must_use]
    pub fn run(&self, records: Vec<Record>, now: DateTime<Utc>) -> GovernedBatch {
        let started = Instant::now();
        let ids = batch_ids(&records);
        let ctx = BatchContext::new(now, &self.quality, &records);
        let chunk = self.run_chunk(records, &ids, &ctx);
        self.assemble(vec![chunk], ids, started)
    }

    /// Govern a batch split over `workers` concurrent chunks. Results come
    /// back in input order.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Other` if a worker panics.
    pub async fn run_parallel(
        self: &Arc<Self>,
        records: Vec<Record>,
        workers: usize,
        now: DateTime<Utc>,
    ) -> Result<GovernedBatch, CoreError> {
        if workers <= 1 || records.len() < 2 {
            return Ok(self.run(records, now));
        }
        let started = Instant::now();
        let ids = batch_ids(&records);
        let ctx = Arc::new(BatchContext::new(now, &self.quality, &records));
        let chunk_size = records.len().div_ceil(workers);

        let mut set = JoinSet::new();
        let mut records = records.into_iter();
        for (idx, chunk_ids) in ids.chunks(chunk_size).enumerate() {
            let chunk: Vec<Record> = records.by_ref().take(chunk_ids.len()).collect();
            let chunk_ids = chunk_ids.to_vec();
            let pipeline = Arc::clone(self);
            let ctx = Arc::clone(&ctx);
            set.spawn(async move { (idx, pipeline.run_chunk(chunk, &chunk_ids, &ctx)) });
        }

        let mut chunks: Vec<Option<ChunkResult>> = Vec::new();
        chunks.resize_with(ids.len().div_ceil(chunk_size), || None);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, chunk)) => chunks[idx] = Some(chunk),
                Err(e) => {
                    warn!(%e, "governance worker failed");
                    return Err(CoreError::Other(anyhow::anyhow!("governance worker failed: {e}")));
                }
            }
        }
        debug!(workers, chunks = chunks.len(), "governance chunks joined");
        Ok(self.assemble(chunks.into_iter().flatten().collect(), ids, started))
    }

    fn assemble(&self, chunks: Vec<ChunkResult>, ids: Vec<String>, started: Instant) -> GovernedBatch {
        let mut result = GovernanceResult {
            total_processed_records: ids.len(),
            ..GovernanceResult::default()
        };
        let mut records = Vec::with_capacity(ids.len());
        let mut scores = Vec::with_capacity(ids.len());
        let mut quality_issues = Vec::new();
        let mut cleansing_issues = Vec::new();
        let mut masking_issues = Vec::new();

        for chunk in chunks {
            records.extend(chunk.records);
            scores.extend(chunk.scores);
            if let Some(report) = chunk.quality {
                merge_outcomes(&mut result.quality, &report.outcomes);
                quality_issues.extend(report.issues);
            }
            if let Some(report) = chunk.cleansing {
                merge_outcomes(&mut result.cleansing, &report.outcomes);
                result.total_cleansing_applied += report.applied;
                cleansing_issues.extend(report.issues);
            }
            if let Some(report) = chunk.masking {
                merge_outcomes(&mut result.masking, &report.outcomes);
                result.total_masking_applied += report.applied;
                masking_issues.extend(report.issues);
            }
        }

        result.overall_quality_score = if self.quality_active() && !scores.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let mean = scores.iter().sum::<f64>() / ids.len() as f64;
            mean * 100.0
        } else {
            100.0
        };
        result.total_validation_errors = quality_issues.len()
            + cleansing_issues
                .iter()
                .filter(|i| i.issue_type == hub_core::governance::ISSUE_VALIDATION_FAILED)
                .count();
        result.issues = quality_issues;
        result.issues.extend(cleansing_issues);
        result.issues.extend(masking_issues);
        result.compliance_status = ComplianceStatus::from_issue_count(result.issues.len());
        result.execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !result.issues.is_empty() {
            warn!(
                issues = result.issues.len(),
                score = result.overall_quality_score,
                "governance raised issues"
            );
        }
        GovernedBatch {
            records,
            record_ids: ids,
            scores,
            result,
        }
    }
}

/// Running total over the batches of one execution.
#[derive(Debug, Default)]
pub struct GovernanceTally {
    result: GovernanceResult,
    score_sum: f64,
}

impl GovernanceTally {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, batch: &GovernedBatch) {
        let total = &mut self.result;
        merge_outcomes(&mut total.quality, &batch.result.quality);
        merge_outcomes(&mut total.cleansing, &batch.result.cleansing);
        merge_outcomes(&mut total.masking, &batch.result.masking);
        total.total_processed_records += batch.result.total_processed_records;
        total.total_cleansing_applied += batch.result.total_cleansing_applied;
        total.total_masking_applied += batch.result.total_masking_applied;
        total.total_validation_errors += batch.result.total_validation_errors;
        total.execution_time_ms += batch.result.execution_time_ms;
        total.issues.extend(batch.result.issues.iter().cloned());
        self.score_sum += batch.scores.iter().sum::<f64>();
    }

    /// Overall result, scored over every record seen.
    #[must_use]
    pub fn finish(self) -> GovernanceResult {
        let mut result = self.result;
        result.overall_quality_score = if result.total_processed_records == 0 {
            100.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = self.score_sum / result.total_processed_records as f64;
            mean * 100.0
        };
        result.compliance_status = ComplianceStatus::from_issue_count(result.issues.len());
        result
    }
}

fn batch_ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| record_identifier(r, i))
        .collect()
}

fn merge_outcomes(into: &mut Vec<RuleOutcome>, from: &[RuleOutcome]) {
    if into.is_empty() {
        into.extend_from_slice(from);
        return;
    }
    for (total, part) in into.iter_mut().zip(from) {
        total.absorb(part);
    }
}
