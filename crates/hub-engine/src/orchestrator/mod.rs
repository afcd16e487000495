//! Sync orchestrator: runs one execution of a task end to end.
//!
//! Phases run in a fixed order: initialize, extract, map, match keys,
//! govern, load, lineage, complete. Cancellation is checked between phases
//! and between batches. Whatever happens, the execution record is finalized
//! and the task leaves `running`.

pub mod cancel;
pub mod progress;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use hub_config::SyncConfig;
use hub_core::entities::{ExecutionCounts, LineageRecord, SyncTask, ThematicInterface};
use hub_core::enums::{ExecutionStatus, ExecutionType, IssueSeverity, SyncPhase, SyncTaskStatus};
use hub_core::errors::CoreError;
use hub_core::governance::{GovernanceResult, ISSUE_MAPPING_ERROR, Issue};
use hub_core::ids::PREFIX_LINEAGE;
use hub_core::rules::source::FilterRule;
use hub_core::schedule::TriggerSpec;
use hub_core::value::Record;
use hub_db::service::HubService;

use crate::extraction::{
    ExtractionPlan, Extractor, SQL_ORIGIN_LIBRARY, SourcedRecord, WatermarkAdvance,
    apply_watermarks, resolve_plan, settle_watermarks,
};
use crate::governance::{GovernanceTally, GovernancePipeline, GovernedBatch};
use crate::mapping::{MatchedRecord, map_record, match_records};
use crate::source::{RecordSink, SourceReader, TargetTable};

pub use cancel::{CancellationRegistry, RunGuard};
pub use progress::{ProgressReporter, SyncProgress};

/// Per-execution knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub execution_type: ExecutionType,
    /// Extract, map and govern, but load nothing, write no lineage and keep
    /// watermarks where they are.
    pub dry_run: bool,
    /// Rows per load call.
    pub batch_size: usize,
    /// Cap on extracted rows.
    pub max_records: Option<usize>,
    /// Whole-run limit.
    pub timeout: Duration,
    pub parallel_workers: usize,
    /// Appended to every interface-mode fetch.
    pub filters: Vec<FilterRule>,
    /// Emit governance progress every this many records.
    pub progress_interval: usize,
    /// Ceiling on any one SQL query's row cap.
    pub max_rows: usize,
    /// Ceiling on any one SQL query's timeout.
    pub query_timeout: Duration,
    /// How often the run re-reads the task to notice a stop written by
    /// another process.
    pub stop_poll_interval: Duration,
}

impl SyncOptions {
    #[must_use]
    pub fn from_config(config: &SyncConfig, execution_type: ExecutionType) -> Self {
        Self {
            execution_type,
            dry_run: false,
            batch_size: config.batch_size.max(1),
            max_records: None,
            timeout: Duration::from_secs(config.execution_timeout_seconds),
            parallel_workers: config.parallel_workers.max(1),
            filters: Vec::new(),
            progress_interval: config.batch_size.max(1),
            max_rows: config.max_rows,
            query_timeout: Duration::from_secs(config.query_timeout_seconds),
            stop_poll_interval: Duration::from_secs(1),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default(), ExecutionType::Manual)
    }
}

/// Summary of one execution, also stored as the execution's `result`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub task_id: String,
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub mode: Option<&'static str>,
    pub dry_run: bool,
    pub counts: ExecutionCounts,
    pub truncated: bool,
    pub key_conflicts: usize,
    pub governance: GovernanceResult,
    pub lineage_records: usize,
    pub watermarks: Vec<WatermarkAdvance>,
    /// Extraction and mapping rejects.
    pub issues: Vec<Issue>,
    pub duration_ms: u64,
}

/// Mutable state of one run; survives a failure so partial counts are kept.
struct RunState {
    execution_id: String,
    progress: ProgressReporter,
    counts: ExecutionCounts,
    mode: Option<&'static str>,
    truncated: bool,
    key_conflicts: usize,
    governance: GovernanceResult,
    lineage_records: usize,
    watermarks: Vec<WatermarkAdvance>,
    issues: Vec<Issue>,
}

impl RunState {
    fn checkpoint(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled {
                execution_id: self.execution_id.clone(),
            });
        }
        Ok(())
    }

    fn report(self, task_id: &str, status: ExecutionStatus, dry_run: bool, started: Instant) -> SyncReport {
        SyncReport {
            task_id: task_id.to_string(),
            execution_id: self.execution_id,
            status,
            mode: self.mode,
            dry_run,
            counts: self.counts,
            truncated: self.truncated,
            key_conflicts: self.key_conflicts,
            governance: self.governance,
            lineage_records: self.lineage_records,
            watermarks: self.watermarks,
            issues: self.issues,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A governed batch with the matched records it came from.
struct Governed {
    matched: Vec<MatchedRecord>,
    batch: GovernedBatch,
}

fn as_count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn record_hash(record: &Record) -> String {
    // Map keys are ordered, so this is canonical.
    let text = serde_json::to_string(record).unwrap_or_default();
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn origin_key(library_id: &str, interface_id: &str, record_id: &str) -> String {
    format!("{library_id}\u{1f}{interface_id}\u{1f}{record_id}")
}

fn processing_rules(task: &SyncTask, mode: &str) -> Value {
    let ids = |rules: Vec<&str>| Value::from(rules);
    json!({
        "source_mode": mode,
        "field_mappings": task.field_mapping.mappings.len(),
        "key_rules": task.key_matching.primary_keys.len(),
        "fuzzy_matching": task.key_matching.fuzzy.enabled,
        "conflict_policy": task.key_matching.conflict_policy,
        "quality_rules": ids(task.quality_rules.iter().filter(|r| r.enabled).map(|r| r.id.as_str()).collect()),
        "cleansing_rules": ids(task.cleansing_rules.iter().filter(|r| r.enabled).map(|r| r.id.as_str()).collect()),
        "masking_rules": ids(task.masking_rules.iter().filter(|r| r.enabled).map(|r| r.id.as_str()).collect()),
        "stages": {
            "quality": task.governance.enable_quality_check,
            "cleansing": task.governance.enable_cleansing,
            "masking": task.governance.enable_masking,
        },
    })
}

fn primary_key_fields(interface: &ThematicInterface) -> Vec<String> {
    let mut fields: Vec<_> = interface
        .table_fields
        .iter()
        .filter(|f| f.is_primary_key)
        .collect();
    fields.sort_by_key(|f| f.order_num);
    fields.into_iter().map(|f| f.name_en.clone()).collect()
}

pub struct Orchestrator {
    svc: Arc<HubService>,
    reader: Arc<dyn SourceReader>,
    sink: Arc<dyn RecordSink>,
    registry: Arc<CancellationRegistry>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        svc: Arc<HubService>,
        reader: Arc<dyn SourceReader>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            svc,
            reader,
            sink,
            registry: Arc::new(CancellationRegistry::new()),
        }
    }

    /// Share a registry with another orchestrator or a task service.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<CancellationRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn service(&self) -> &Arc<HubService> {
        &self.svc
    }

    /// Run one execution of `task_id`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the task cannot start, and
    /// otherwise the error that ended the run (`FatalExecution`,
    /// `Cancelled`, a storage error). The execution record is finalized
    /// in every case once it exists.
    #[instrument(skip(self, options, progress), fields(execution_type = %options.execution_type))]
    pub async fn run(
        &self,
        task_id: &str,
        options: &SyncOptions,
        progress: Option<mpsc::Sender<SyncProgress>>,
    ) -> Result<SyncReport, CoreError> {
        let task = self.svc.get_sync_task(task_id).await?;
        if !task.status.can_start() {
            return Err(CoreError::Validation(format!(
                "sync task {task_id} cannot start from {}",
                task.status
            )));
        }
        self.svc
            .transition_sync_task(task_id, SyncTaskStatus::Running)
            .await?;
        let execution = match self.svc.create_execution(task_id, options.execution_type).await {
            Ok(execution) => execution,
            Err(e) => {
                let message = format!("could not open execution: {e}");
                if let Err(revert) = self
                    .svc
                    .record_task_run(task_id, SyncTaskStatus::Failed, ExecutionStatus::Failed, Some(&message))
                    .await
                {
                    error!(task_id, error = %revert, "task left running after failed start");
                }
                return Err(e.into());
            }
        };
        let started = Instant::now();
        info!(task_id, execution_id = %execution.id, dry_run = options.dry_run, "sync started");

        let mut run = RunState {
            execution_id: execution.id.clone(),
            progress: ProgressReporter::new(&execution.id, progress),
            counts: ExecutionCounts::default(),
            mode: None,
            truncated: false,
            key_conflicts: 0,
            governance: GovernanceResult::default(),
            lineage_records: 0,
            watermarks: Vec::new(),
            issues: Vec::new(),
        };

        let mut outcome = match self.registry.register(task_id, &execution.id) {
            Ok(guard) => {
                let token = guard.token();
                let watch = self.watch_store(task_id, options.stop_poll_interval, token.clone());
                let timed =
                    tokio::time::timeout(options.timeout, self.pipeline(&task, options, &mut run, &token))
                        .await;
                watch.abort();
                timed.unwrap_or_else(|_| {
                    token.cancel();
                    Err(CoreError::FatalExecution(format!(
                        "execution exceeded its {}s timeout",
                        options.timeout.as_secs()
                    )))
                })
            }
            Err(e) => Err(e),
        };

        if outcome.is_ok() {
            let status = self.svc.get_sync_task(task_id).await.map(|t| t.status);
            if !matches!(status, Ok(SyncTaskStatus::Running)) {
                outcome = Err(CoreError::Cancelled {
                    execution_id: execution.id.clone(),
                });
            }
        }

        if outcome.is_ok() && !options.dry_run && !run.watermarks.is_empty() {
            if let Err(e) = self.persist_watermarks(task_id, &run.watermarks).await {
                outcome = Err(e);
            }
        }

        let (status, next_status) = match &outcome {
            Ok(()) => {
                let next = if matches!(task.schedule.trigger, TriggerSpec::Once { .. }) {
                    SyncTaskStatus::Completed
                } else {
                    SyncTaskStatus::Active
                };
                (ExecutionStatus::Success, next)
            }
            Err(CoreError::Cancelled { .. }) => (ExecutionStatus::Cancelled, SyncTaskStatus::Stopped),
            Err(_) => (ExecutionStatus::Failed, SyncTaskStatus::Failed),
        };
        let counts = run.counts;
        let report = run.report(task_id, status, options.dry_run, started);
        let error_text = outcome.as_ref().err().map(ToString::to_string);
        let message = error_text.clone().unwrap_or_else(|| {
            format!(
                "{} processed, {} inserted, {} updated, {} errors",
                counts.processed_records, counts.inserted_records, counts.updated_records, counts.error_records
            )
        });

        match &outcome {
            Ok(()) => info!(
                task_id,
                execution_id = %report.execution_id,
                processed = counts.processed_records,
                score = report.governance.overall_quality_score,
                "sync completed"
            ),
            Err(CoreError::Cancelled { .. }) => {
                warn!(task_id, execution_id = %report.execution_id, "sync cancelled");
            }
            Err(e) => error!(task_id, execution_id = %report.execution_id, error = %e, "sync failed"),
        }

        let bookkeeping = self
            .close(task_id, &report, next_status, error_text.as_deref(), &message)
            .await;
        match (outcome, bookkeeping) {
            (Ok(()), Ok(())) => Ok(report),
            (Ok(()), Err(e)) | (Err(e), _) => Err(e),
        }
    }

    async fn close(
        &self,
        task_id: &str,
        report: &SyncReport,
        next_status: SyncTaskStatus,
        error_details: Option<&str>,
        message: &str,
    ) -> Result<(), CoreError> {
        let summary = serde_json::to_value(report).map_err(|e| CoreError::Other(e.into()))?;
        let recorded = self
            .svc
            .record_task_run(task_id, next_status, report.status, Some(message))
            .await;
        let (status, details) = match &recorded {
            Ok(_) => (report.status, error_details.map(str::to_string)),
            Err(e) => {
                error!(task_id, error = %e, "run outcome could not be recorded on the task");
                (
                    ExecutionStatus::Failed,
                    Some(format!("run outcome could not be recorded: {e}")),
                )
            }
        };
        let finalized = self
            .svc
            .finalize_execution(
                &report.execution_id,
                status,
                report.counts,
                Some(&summary),
                details.as_deref(),
            )
            .await;
        if let Err(e) = &finalized {
            error!(execution_id = %report.execution_id, error = %e, "execution could not be finalized");
        }
        recorded?;
        finalized?;
        Ok(())
    }

    async fn persist_watermarks(
        &self,
        task_id: &str,
        advances: &[WatermarkAdvance],
    ) -> Result<(), CoreError> {
        // Re-read so concurrent config edits are not overwritten.
        let mut source = self.svc.get_sync_task(task_id).await?.data_source;
        let applied = apply_watermarks(&mut source, advances);
        if applied > 0 {
            self.svc.update_data_source(task_id, &source).await?;
            debug!(task_id, applied, "watermarks advanced");
        }
        Ok(())
    }

    /// Poll the stored status for the life of a run and trip `cancel` once
    /// the task is no longer `running`.
    fn watch_store(&self, task_id: &str, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let svc = Arc::clone(&self.svc);
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match svc.get_sync_task(&task_id).await {
                    Ok(task) if task.status != SyncTaskStatus::Running => {
                        info!(task_id = %task_id, status = %task.status, "stop recorded in the store; cancelling");
                        cancel.cancel();
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(task_id = %task_id, error = %e, "stop watch could not read the task"),
                }
            }
        })
    }

    /// Trip `cancel` when the store says the task was stopped elsewhere, then
    /// check it.
    async fn poll_stop(
        &self,
        task_id: &str,
        run: &RunState,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        if !cancel.is_cancelled() {
            let status = self.svc.get_sync_task(task_id).await?.status;
            if status != SyncTaskStatus::Running {
                info!(task_id, %status, "stop recorded in the store; cancelling");
                cancel.cancel();
            }
        }
        run.checkpoint(cancel)
    }

    async fn pipeline(
        &self,
        task: &SyncTask,
        options: &SyncOptions,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        // -- initialize
        run.progress.enter(SyncPhase::Initialize, "resolving target and sources");
        let interface = self.svc.get_interface(&task.interface_id).await?;
        let library = self.svc.get_library(&interface.library_id).await?;
        if !options.dry_run {
            if interface.interface_type.is_view() {
                return Err(CoreError::FatalExecution(format!(
                    "target interface {} is a view and cannot be loaded",
                    interface.id
                )));
            }
            if !interface.is_table_created {
                return Err(CoreError::FatalExecution(format!(
                    "target table {}.{} has not been created",
                    library.name_en, interface.name_en
                )));
            }
        }
        let now = Utc::now();
        let mut plan = resolve_plan(&task.data_source, &options.filters, options.batch_size, now)
            .map_err(|e| match e {
                CoreError::Validation(msg) => CoreError::FatalExecution(msg),
                other => other,
            })?;
        if let ExtractionPlan::Sql(fetches) = &mut plan {
            for fetch in fetches {
                fetch.max_rows = fetch.max_rows.min(options.max_rows);
                fetch.timeout = fetch.timeout.min(options.query_timeout);
            }
        }
        run.mode = Some(plan.mode());
        let pipeline = Arc::new(GovernancePipeline::new(
            &task.governance,
            &task.quality_rules,
            &task.cleansing_rules,
            &task.masking_rules,
        ));

        // -- extract
        self.poll_stop(&task.id, run, cancel).await?;
        run.progress
            .enter(SyncPhase::Extract, format!("extracting in {} mode", plan.mode()));
        let extraction = Extractor::new(self.reader.as_ref(), &run.execution_id)
            .with_cancel(cancel.clone())
            .with_max_records(options.max_records)
            .run(&plan)
            .await?;
        run.counts.source_records = as_count(extraction.source_count());
        run.counts.error_records += as_count(extraction.issues.len());
        run.truncated = extraction.truncated;
        run.issues.extend(extraction.issues);
        let hashes: HashMap<String, String> = extraction
            .records
            .iter()
            .flat_map(|sourced| {
                let hash = record_hash(&sourced.record);
                sourced.origins.iter().map(move |o| {
                    (origin_key(&o.library_id, &o.interface_id, &o.record_id), hash.clone())
                })
            })
            .collect();
        debug!(records = extraction.records.len(), "extraction finished");

        // -- map
        self.poll_stop(&task.id, run, cancel).await?;
        run.progress.enter(SyncPhase::Map, "mapping fields");
        let mut mapped = Vec::with_capacity(extraction.records.len());
        for sourced in extraction.records {
            match map_record(&task.field_mapping, &sourced.record) {
                Ok(record) => mapped.push(SourcedRecord {
                    origins: sourced.origins,
                    record,
                    cursor: sourced.cursor,
                }),
                Err(failure) => {
                    let record_id = sourced
                        .origins
                        .first()
                        .map_or_else(String::new, |o| o.record_id.clone());
                    run.counts.error_records += 1;
                    run.issues.push(
                        Issue::new(ISSUE_MAPPING_ERROR, IssueSeverity::Error, record_id, failure.message)
                            .with_field(failure.field),
                    );
                }
            }
        }

        run.watermarks = settle_watermarks(&extraction.pending, &mapped);

        // -- match keys
        self.poll_stop(&task.id, run, cancel).await?;
        run.progress.enter(SyncPhase::MatchKeys, "matching keys");
        let matched = match_records(&task.key_matching, mapped)?;
        run.key_conflicts = matched.conflicts;
        let key_fields = if matched.key_fields.is_empty() {
            primary_key_fields(&interface)
        } else {
            matched.key_fields
        };

        // -- govern
        let governed =
            Self::govern(task, options, run, cancel, &pipeline, matched.records, now).await?;
        if task.governance.stop_on_quality_failure
            && run.governance.overall_quality_score < task.governance.quality_threshold
        {
            return Err(CoreError::FatalExecution(format!(
                "quality score {:.1} is below the threshold {:.1}",
                run.governance.overall_quality_score, task.governance.quality_threshold
            )));
        }

        if options.dry_run {
            run.progress.enter(SyncPhase::Complete, "dry run finished; nothing loaded");
            return Ok(());
        }

        // -- load
        self.poll_stop(&task.id, run, cancel).await?;
        run.progress.enter(SyncPhase::Load, format!("loading into {}.{}", library.name_en, interface.name_en));
        let target = TargetTable::new(&library.name_en, &interface.name_en);
        let total = run.counts.processed_records;
        let mut loaded = 0_u64;
        for part in &governed {
            for chunk in part.batch.records.chunks(options.batch_size.max(1)) {
                self.poll_stop(&task.id, run, cancel).await?;
                let outcome = self.sink.upsert(&target, &key_fields, chunk).await?;
                run.counts.inserted_records += outcome.inserted;
                run.counts.updated_records += outcome.updated;
                loaded += as_count(chunk.len());
                run.progress
                    .advance(loaded, total, run.counts.error_records, "loading");
            }
        }

        // -- lineage
        self.poll_stop(&task.id, run, cancel).await?;
        run.progress.enter(SyncPhase::Lineage, "recording lineage");
        let rules = processing_rules(task, plan.mode());
        for part in &governed {
            let records = self
                .lineage_for(task, &run.execution_id, &hashes, &rules, part, Utc::now())
                .await?;
            run.lineage_records += self.svc.insert_lineage(&records).await?;
        }

        run.progress.enter(
            SyncPhase::Complete,
            format!("{} records synchronized", run.counts.processed_records),
        );
        Ok(())
    }

    async fn govern(
        task: &SyncTask,
        options: &SyncOptions,
        run: &mut RunState,
        cancel: &CancellationToken,
        pipeline: &Arc<GovernancePipeline>,
        records: Vec<MatchedRecord>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Governed>, CoreError> {
        run.checkpoint(cancel)?;
        run.progress.enter(SyncPhase::Govern, "applying governance rules");
        let total = records.len();
        let batch_size = task.governance.batch_size.max(1);
        let interval = options.progress_interval.max(1);
        let mut tally = GovernanceTally::new();
        let mut governed = Vec::new();
        let mut remaining = records.into_iter();
        let mut processed = 0;
        let mut reported = 0;
        loop {
            let mut matched: Vec<MatchedRecord> = remaining.by_ref().take(batch_size).collect();
            if matched.is_empty() {
                break;
            }
            run.checkpoint(cancel)?;
            let input: Vec<Record> = matched
                .iter_mut()
                .map(|m| std::mem::take(&mut m.record))
                .collect();
            let batch = Self::govern_batch(task, options, pipeline, input, now).await?;
            tally.add(&batch);
            processed += matched.len();
            if processed - reported >= interval || processed == total {
                reported = processed;
                run.progress.advance(
                    as_count(processed),
                    as_count(total),
                    as_count(batch.result.issues.len()),
                    "governing",
                );
            }
            governed.push(Governed { matched, batch });
        }
        run.governance = tally.finish();
        run.counts.processed_records = as_count(total);
        debug!(
            records = total,
            score = run.governance.overall_quality_score,
            issues = run.governance.issues.len(),
            "governance finished"
        );
        Ok(governed)
    }

    /// One governance batch under the task's time limit, re-run up to
    /// `max_retries` times on a timeout or a failed worker.
    async fn govern_batch(
        task: &SyncTask,
        options: &SyncOptions,
        pipeline: &Arc<GovernancePipeline>,
        input: Vec<Record>,
        now: DateTime<Utc>,
    ) -> Result<GovernedBatch, CoreError> {
        let limit = Duration::from_secs(task.governance.timeout_seconds.max(1));
        let attempts = task.governance.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            let run = pipeline.run_parallel(input.clone(), options.parallel_workers, now);
            let err = match tokio::time::timeout(limit, run).await {
                Ok(Ok(batch)) => return Ok(batch),
                Ok(Err(e)) => e,
                Err(_) => CoreError::FatalExecution(format!(
                    "governance batch exceeded its {}s timeout",
                    limit.as_secs()
                )),
            };
            if attempt >= attempts {
                return Err(err);
            }
            warn!(attempt, attempts, error = %err, "governance batch failed; retrying");
            attempt += 1;
        }
    }

    async fn lineage_for(
        &self,
        task: &SyncTask,
        execution_id: &str,
        hashes: &HashMap<String, String>,
        rules: &Value,
        part: &Governed,
        processed_at: DateTime<Utc>,
    ) -> Result<Vec<LineageRecord>, CoreError> {
        let mut records = Vec::new();
        for (index, matched) in part.matched.iter().enumerate() {
            let score = part.batch.scores.get(index).copied().unwrap_or(1.0) * 100.0;
            let issues = part.batch.issues_for(index);
            for origin in &matched.origins {
                let sql = origin.library_id == SQL_ORIGIN_LIBRARY;
                records.push(LineageRecord {
                    id: self.svc.db().generate_id(PREFIX_LINEAGE).await?,
                    task_id: task.id.clone(),
                    execution_id: execution_id.to_string(),
                    thematic_interface_id: task.interface_id.clone(),
                    thematic_record_id: matched.key.clone(),
                    source_library_id: (!sql).then(|| origin.library_id.clone()),
                    source_interface_id: Some(origin.interface_id.clone()),
                    source_record_id: origin.record_id.clone(),
                    source_record_hash: hashes
                        .get(&origin_key(&origin.library_id, &origin.interface_id, &origin.record_id))
                        .cloned()
                        .unwrap_or_default(),
                    processing_rules: rules.clone(),
                    quality_score: score,
                    quality_issues: issues.clone(),
                    processed_at,
                });
            }
        }
        Ok(records)
    }
}
