//! Task lifecycle through the task service.

mod common;

use pretty_assertions::assert_eq;
use tracing_test::traced_test;

use hub_core::enums::{ExecutionStatus, ExecutionType, SyncTaskStatus};
use hub_core::errors::CoreError;
use hub_core::rules::governance::{QualityCheck, QualityRule};
use hub_core::schedule::{ScheduleConfig, TriggerSpec};
use hub_db::repos::execution::ExecutionFilter;
use hub_db::repos::sync_task::SyncTaskFilter;
use hub_db::updates::sync_task::SyncTaskUpdateBuilder;
use hub_engine::orchestrator::SyncOptions;
use hub_engine::tasks::StopOutcome;

use common::{FailingSink, Harness, customers, memory_sink, memory_source};

fn every_minute() -> ScheduleConfig {
    ScheduleConfig::new(TriggerSpec::Cron {
        cron_expression: "0 * * * * *".into(),
    })
}

#[tokio::test]
async fn create_validates_every_document() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let mut bad = h.new_task(" ");
    bad.schedule = ScheduleConfig::new(TriggerSpec::Interval { interval_seconds: 0 });
    bad.quality_rules = vec![QualityRule::new("q", QualityCheck::Completeness, Vec::<String>::new())];

    let err = h.tasks.create_task(&bad).await.unwrap_err();
    let CoreError::Validation(msg) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert!(msg.contains("task.name"), "{msg}");
    assert!(msg.contains("task.schedule"), "{msg}");
    assert!(msg.contains("task.quality_rules"), "{msg}");

    let mut cron = h.new_task("bad-cron");
    cron.schedule = ScheduleConfig::new(TriggerSpec::Cron {
        cron_expression: "every tuesday".into(),
    });
    assert!(matches!(
        h.tasks.create_task(&cron).await,
        Err(CoreError::Validation(_))
    ));
}

#[tokio::test]
async fn names_are_unique_and_resolve_to_tasks() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let mut new = h.new_task("nightly");
    new.schedule = every_minute();
    let task = h.create(new.clone()).await;

    assert_eq!(task.status, SyncTaskStatus::Draft);
    assert!(task.next_run_time.is_some());
    assert!(matches!(
        h.tasks.create_task(&new).await,
        Err(CoreError::Conflict(_))
    ));

    let by_name = h.tasks.get_task("nightly").await.unwrap();
    assert_eq!(by_name.id, task.id);
    assert!(matches!(
        h.tasks.get_task("missing").await,
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn activate_and_stop_round_trip() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let mut new = h.new_task("hourly");
    new.schedule = every_minute();
    let task = h.create(new).await;

    assert!(matches!(
        h.tasks.stop_task(&task.id).await,
        Err(CoreError::Validation(_))
    ));

    let active = h.tasks.activate_task(&task.id).await.unwrap();
    assert_eq!(active.status, SyncTaskStatus::Active);
    assert!(active.next_run_time.is_some());
    // Activating twice changes nothing.
    let again = h.tasks.activate_task(&task.id).await.unwrap();
    assert_eq!(again.next_run_time, active.next_run_time);

    let listed = h
        .tasks
        .list_tasks(&SyncTaskFilter {
            status: Some(SyncTaskStatus::Active),
            ..SyncTaskFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    assert_eq!(h.tasks.stop_task(&task.id).await.unwrap(), StopOutcome::Stopped);
    let stopped = h.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(stopped.status, SyncTaskStatus::Stopped);
    assert_eq!(stopped.next_run_time, None);

    // Stopped tasks must be activated before they run again.
    assert!(matches!(
        h.tasks.execute_now(&task.id, &SyncOptions::default(), None).await,
        Err(CoreError::Validation(_))
    ));
    h.tasks.activate_task(&task.id).await.unwrap();
    h.tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap();
}

#[tokio::test]
#[traced_test]
async fn stop_without_a_local_run_is_recorded() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let task = h.create(h.new_task("orphaned")).await;
    h.svc
        .transition_sync_task(&task.id, SyncTaskStatus::Running)
        .await
        .unwrap();

    assert!(matches!(
        h.tasks
            .update_task(&task.id, SyncTaskUpdateBuilder::new().name("renamed").build())
            .await,
        Err(CoreError::Conflict(_))
    ));
    assert_eq!(h.tasks.stop_task(&task.id).await.unwrap(), StopOutcome::Requested);
    assert!(logs_contain("stop recorded for the owning process"));
    assert_eq!(
        h.tasks.get_task(&task.id).await.unwrap().status,
        SyncTaskStatus::Stopped
    );
}

#[tokio::test]
async fn schedule_updates_recompute_next_run() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let task = h.create(h.new_task("reschedule")).await;
    assert_eq!(task.next_run_time, None);

    let updated = h
        .tasks
        .update_task(
            &task.id,
            SyncTaskUpdateBuilder::new()
                .name("rescheduled")
                .schedule(ScheduleConfig::new(TriggerSpec::Interval {
                    interval_seconds: 300,
                }))
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "rescheduled");
    let next = updated.next_run_time.unwrap();
    let delta = next - chrono::Utc::now();
    assert!(delta.num_seconds() > 290 && delta.num_seconds() <= 300);

    let err = h
        .tasks
        .update_task(
            &task.id,
            SyncTaskUpdateBuilder::new()
                .schedule(ScheduleConfig::new(TriggerSpec::Interval { interval_seconds: 0 }))
                .build(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(ref msg) if msg.contains("update.schedule")));
}

#[tokio::test]
async fn history_and_statistics_follow_runs() {
    let h = Harness::new(memory_source(customers()), memory_sink()).await;
    let task = h.create(h.new_task("history")).await;
    let scheduled = h.tasks.options(ExecutionType::Scheduled);

    h.tasks
        .execute_now(&task.id, &SyncOptions::default(), None)
        .await
        .unwrap();
    h.tasks.execute_now(&task.id, &scheduled, None).await.unwrap();

    let page = h
        .tasks
        .list_executions(&ExecutionFilter {
            task_id: Some(task.id.clone()),
            ..ExecutionFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let only_scheduled = h
        .tasks
        .list_executions(&ExecutionFilter {
            task_id: Some(task.id.clone()),
            execution_type: Some(ExecutionType::Scheduled),
            ..ExecutionFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(only_scheduled.total, 1);
    assert_eq!(
        only_scheduled.executions[0].execution_type,
        ExecutionType::Scheduled
    );

    let stats = h.tasks.task_statistics(&task.id).await.unwrap();
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.successful_executions, 2);
    assert_eq!(stats.total_processed_records, 6);
    assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);

    let status = h.tasks.task_status(&task.id).await.unwrap();
    assert_eq!(status.task.total_runs, 2);
    assert_eq!(
        status.last_execution.unwrap().status,
        ExecutionStatus::Success
    );

    assert!(matches!(
        h.tasks.task_statistics("syn_missing").await,
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn failed_runs_count_against_the_task() {
    let h = Harness::new(memory_source(customers()), std::sync::Arc::new(FailingSink)).await;
    let task = h.create(h.new_task("fragile")).await;

    for _ in 0..2 {
        assert!(h
            .tasks
            .execute_now(&task.id, &SyncOptions::default(), None)
            .await
            .is_err());
    }
    let stats = h.tasks.task_statistics(&task.id).await.unwrap();
    assert_eq!(stats.failed_executions, 2);
    assert!(stats.success_rate.abs() < f64::EPSILON);

    let task = h.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(task.failed_runs, 2);
    assert_eq!(task.status, SyncTaskStatus::Failed);
    h.tasks.delete_task(&task.id).await.unwrap();
    assert!(h.tasks.get_task(&task.id).await.is_err());
}
