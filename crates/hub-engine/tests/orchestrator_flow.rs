//! End-to-end runs of the orchestrator against in-memory collaborators and
//! an in-memory metadata store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;

use hub_core::enums::{ExecutionStatus, SyncPhase, SyncTaskStatus};
use hub_core::errors::CoreError;
use hub_core::governance::ISSUE_QUALITY_BELOW_THRESHOLD;
use hub_core::rules::governance::{
    MaskingRule, MaskingStrategy, QualityCheck, QualityRule, SensitiveKind,
};
use hub_core::rules::source::{IncrementalConfig, IncrementalFieldType, SqlQueryConfig};
use hub_core::schedule::{ScheduleConfig, TriggerSpec};
use hub_config::SyncConfig;
use hub_engine::orchestrator::{Orchestrator, SyncOptions};
use hub_engine::source::MemorySource;
use hub_engine::tasks::{StopOutcome, TaskService};

use common::{
    FailingSink, GatedSource, Harness, HeldSource, customers, memory_sink, memory_source, rec,
};

fn incremental_source() -> hub_core::rules::source::DataSourceConfig {
    let mut source = common::crm_source();
    let mut inc = IncrementalConfig::new("updated_at", IncrementalFieldType::Timestamp);
    inc.last_sync_value = Some("2024-01-01T00:00:00Z".into());
    inc.batch_size = 500;
    source.source_libraries[0].interfaces[0].incremental = Some(inc);
    source
}

fn watermark(task: &hub_core::entities::SyncTask) -> Option<String> {
    task.data_source.source_libraries[0].interfaces[0]
        .incremental
        .as_ref()
        .and_then(|inc| inc.last_sync_value.clone())
}

#[tokio::test]
async fn interface_run_governs_loads_and_records_lineage() {
    let sink = memory_sink();
    let h = Harness::new(memory_source(customers()), sink.clone()).await;
    let mut new = h.new_task("crm-residents");
    new.quality_rules = vec![QualityRule::new("q-email", QualityCheck::Completeness, ["email"])];
    new.masking_rules = vec![MaskingRule::new(
        "m-email",
        MaskingStrategy::Anonymize {
            kind: SensitiveKind::Email,
        },
        ["email"],
    )];
    let task = h.create(new).await;

    let report = h
        .tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.mode, Some("interface"));
    assert_eq!(report.counts.source_records, 3);
    assert_eq!(report.counts.processed_records, 3);
    assert_eq!(report.counts.inserted_records, 3);
    assert_eq!(report.governance.issues.len(), 1);
    assert_eq!(report.governance.issues[0].issue_type, ISSUE_QUALITY_BELOW_THRESHOLD);
    assert!(!report.governance.is_compliant());

    let rows = sink.rows(&h.target());
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["email"], json!("anonymous@corp.io"));

    let lineage = h.svc.lineage_for_execution(&report.execution_id).await.unwrap();
    assert_eq!(lineage.len(), 3);
    assert_eq!(report.lineage_records, 3);
    assert!(lineage.iter().all(|l| l.source_library_id.as_deref() == Some("crm")));
    assert!(lineage.iter().all(|l| l.source_record_hash.len() == 64));
    let linus = lineage.iter().find(|l| l.source_record_id == "3").unwrap();
    assert_eq!(linus.quality_issues.len(), 1);
    assert!(linus.quality_score < 100.0);

    let upstream = h.tasks.lineage_for_record(&h.interface.id, "2").await.unwrap();
    assert_eq!(upstream.len(), 1);
    let downstream = h.tasks.impact_of_source("crm", "customers", "2").await.unwrap();
    assert_eq!(downstream[0].thematic_record_id, "2");

    let execution = h.tasks.get_execution(&report.execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.counts.inserted_records, 3);
    assert!(execution.result.is_some());

    let task = h.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, SyncTaskStatus::Active);
    assert_eq!(task.total_runs, 1);
    assert_eq!(task.successful_runs, 1);
    assert_eq!(task.last_sync_status, Some(ExecutionStatus::Success));

    // Same keys again: every row is an update.
    let again = h
        .tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(again.counts.inserted_records, 0);
    assert_eq!(again.counts.updated_records, 3);
    assert_eq!(sink.rows(&h.target()).len(), 3);
}

#[tokio::test]
async fn sql_mode_takes_precedence_over_interfaces() {
    let sql = "SELECT id, name FROM staging.people";
    let source = Arc::new(
        MemorySource::new()
            .with_sql(sql, vec![rec(json!({"id": 7, "name": "Edsger"}))])
            .with_interface("crm", "customers", customers()),
    );
    let sink = memory_sink();
    let h = Harness::new(source.clone(), sink.clone()).await;
    let mut new = h.new_task("sql-first");
    new.data_source.sql_queries = vec![SqlQueryConfig::new(sql)];
    let task = h.create(new).await;

    let report = h
        .tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap();

    assert_eq!(report.mode, Some("sql"));
    assert_eq!(source.sql_log().len(), 1);
    assert!(source.interface_log().is_empty());
    assert_eq!(sink.rows(&h.target()).len(), 1);
    let lineage = h.svc.lineage_for_execution(&report.execution_id).await.unwrap();
    assert_eq!(lineage[0].source_library_id, None);
    assert_eq!(lineage[0].source_interface_id.as_deref(), Some("query_0"));
}

#[tokio::test]
async fn watermark_advances_after_success() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let mut new = h.new_task("incremental");
    new.data_source = incremental_source();
    let task = h.create(new).await;

    let report = h
        .tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(report.watermarks.len(), 1);

    let task = h.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(watermark(&task).as_deref(), Some("2024-01-05T10:00:00Z"));
}

#[tokio::test]
async fn capped_runs_do_not_skip_older_rows() {
    let sink = memory_sink();
    let h = Harness::new(memory_source(customers()), sink.clone()).await;
    let mut new = h.new_task("incremental-capped");
    new.data_source = incremental_source();
    let task = h.create(new).await;
    let options = SyncOptions {
        max_records: Some(2),
        ..SyncOptions::default()
    };

    let mut marks = Vec::new();
    for _ in 0..3 {
        let report = h.tasks.execute_now(&task.id, &options, None).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Success);
        marks.push(watermark(&h.tasks.get_task(&task.id).await.unwrap()));
    }

    assert_eq!(
        marks,
        vec![
            Some("2024-01-02T08:00:00Z".to_string()),
            Some("2024-01-03T12:00:00Z".to_string()),
            Some("2024-01-05T10:00:00Z".to_string()),
        ]
    );
    assert_eq!(sink.rows(&h.target()).len(), 3);
}

#[tokio::test]
async fn failed_run_keeps_watermark_and_marks_task_failed() {
    let h = Harness::new(memory_source(customers()), Arc::new(FailingSink)).await;
    let mut new = h.new_task("incremental-broken-sink");
    new.data_source = incremental_source();
    let task = h.create(new).await;

    let err = h
        .tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("read-only"));

    let task = h.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(watermark(&task).as_deref(), Some("2024-01-01T00:00:00Z"));
    assert_eq!(task.status, SyncTaskStatus::Failed);
    assert_eq!(task.failed_runs, 1);

    let status = h.tasks.task_status(&task.id).await.unwrap();
    let last = status.last_execution.unwrap();
    assert_eq!(last.status, ExecutionStatus::Failed);
    assert_eq!(last.counts.source_records, 3);
    assert!(last.error_details.unwrap().contains("read-only"));
    assert!(!status.in_flight);
    // Failed tasks may run again.
    assert!(task.status.can_start());
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let sink = memory_sink();
    let h = Harness::new(memory_source(customers()), sink.clone()).await;
    let mut new = h.new_task("dry");
    new.data_source = incremental_source();
    let task = h.create(new).await;

    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let report = h.tasks.execute_now(&task.id, &options, None).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.counts.processed_records, 3);
    assert!(sink.rows(&h.target()).is_empty());
    assert!(h.svc.lineage_for_execution(&report.execution_id).await.unwrap().is_empty());
    let task = h.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(watermark(&task).as_deref(), Some("2024-01-01T00:00:00Z"));
}

#[tokio::test]
async fn no_data_source_is_fatal() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let mut new = h.new_task("empty");
    new.data_source = hub_core::rules::source::DataSourceConfig::default();
    let task = h.create(new).await;

    let err = h
        .tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::FatalExecution(_)));

    let stats = h.tasks.task_statistics(&task.id).await.unwrap();
    assert_eq!(stats.total_executions, 1);
    assert_eq!(stats.failed_executions, 1);
}

#[tokio::test]
async fn quality_gate_aborts_before_load() {
    let sink = memory_sink();
    let h = Harness::new(memory_source(customers()), sink.clone()).await;
    let mut new = h.new_task("gated");
    new.quality_rules = vec![QualityRule::new("q-email", QualityCheck::Completeness, ["email"])];
    new.governance.stop_on_quality_failure = true;
    new.governance.quality_threshold = 90.0;
    let task = h.create(new).await;

    let err = h
        .tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::FatalExecution(ref msg) if msg.contains("below the threshold")));
    assert!(sink.rows(&h.target()).is_empty());
}

#[tokio::test]
async fn once_trigger_completes_the_task() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let mut new = h.new_task("one-shot");
    new.schedule = ScheduleConfig::new(TriggerSpec::Once {
        scheduled_time: chrono::Utc::now() + chrono::Duration::hours(1),
    });
    let task = h.create(new).await;
    assert!(task.next_run_time.is_some());

    h.tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap();
    let task = h.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, SyncTaskStatus::Completed);
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_complete() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let task = h.create(h.new_task("progress")).await;
    let (tx, mut rx) = mpsc::channel(64);

    let options = SyncOptions {
        progress_interval: 1,
        ..SyncOptions::default()
    };
    h.tasks.execute_now(&task.id, &options, Some(tx)).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    let phases: Vec<SyncPhase> = events.iter().map(|e| e.phase).collect();
    for phase in [
        SyncPhase::Extract,
        SyncPhase::Map,
        SyncPhase::MatchKeys,
        SyncPhase::Govern,
        SyncPhase::Load,
        SyncPhase::Lineage,
    ] {
        assert!(phases.contains(&phase), "missing {phase}");
    }
    let last = events.last().unwrap();
    assert_eq!(last.phase, SyncPhase::Complete);
    assert_eq!(last.percent, 100);
}

#[tokio::test]
async fn stop_cancels_the_in_flight_run() {
    let source = GatedSource::new();
    let h = Harness::new(source.clone(), memory_sink()).await;
    let mut new = h.new_task("long-running");
    new.data_source.source_libraries[0].interfaces[0].batch_size = Some(2);
    let task = h.create(new).await;

    let tasks = Arc::clone(&h.tasks);
    let id = task.id.clone();
    let run = tokio::spawn(async move {
        tasks.execute_now(&id, &SyncOptions::default(), None).await
    });

    source.started.notified().await;
    // A second start is refused while the first runs.
    let second = h.tasks.execute_now(&task.id, &SyncOptions::default(), None).await;
    assert!(matches!(second, Err(CoreError::Validation(_))));
    assert!(h.tasks.task_status(&task.id).await.unwrap().in_flight);
    assert!(matches!(
        h.tasks.delete_task(&task.id).await,
        Err(CoreError::Conflict(_))
    ));

    assert_eq!(h.tasks.stop_task(&task.id).await.unwrap(), StopOutcome::Cancelling);
    source.release.notify_one();

    let result = run.await.unwrap();
    assert!(matches!(result, Err(CoreError::Cancelled { .. })));

    let status = h.tasks.task_status(&task.id).await.unwrap();
    assert_eq!(status.task.status, SyncTaskStatus::Stopped);
    assert_eq!(status.last_execution.unwrap().status, ExecutionStatus::Cancelled);
    assert!(!status.in_flight);
}

#[tokio::test]
async fn stop_from_another_process_cancels_the_run() {
    let source = HeldSource::new(customers());
    let sink = memory_sink();
    let h = Harness::new(source.clone(), sink.clone()).await;
    let task = h.create(h.new_task("remote-stop")).await;
    // Same store, its own registry: what `task stop` sees from another process.
    let remote = TaskService::new(
        Arc::new(Orchestrator::new(
            Arc::clone(&h.svc),
            memory_source(Vec::new()),
            memory_sink(),
        )),
        SyncConfig::default(),
    );

    let tasks = Arc::clone(&h.tasks);
    let id = task.id.clone();
    let run = tokio::spawn(async move {
        tasks.execute_now(&id, &SyncOptions::default(), None).await
    });

    source.started.notified().await;
    assert_eq!(remote.stop_task(&task.id).await.unwrap(), StopOutcome::Requested);
    source.release.notify_one();

    let result = run.await.unwrap();
    assert!(matches!(result, Err(CoreError::Cancelled { .. })), "{result:?}");
    assert!(sink.rows(&h.target()).is_empty());

    let status = h.tasks.task_status(&task.id).await.unwrap();
    assert_eq!(status.task.status, SyncTaskStatus::Stopped);
    assert_eq!(status.task.total_runs, 1);
    assert_eq!(status.last_execution.unwrap().status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn timeout_fails_the_run() {
    let source = GatedSource::new();
    let h = Harness::new(source, memory_sink()).await;
    let task = h.create(h.new_task("stuck")).await;

    let options = SyncOptions {
        timeout: Duration::from_millis(50),
        ..SyncOptions::default()
    };
    let err = h.tasks.execute_now(&task.id, &options, None).await.unwrap_err();
    assert!(matches!(err, CoreError::FatalExecution(ref msg) if msg.contains("timeout")));
    let task = h.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, SyncTaskStatus::Failed);
}
