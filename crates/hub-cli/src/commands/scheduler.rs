use chrono::{DateTime, Utc};
use serde::Serialize;

use hub_core::enums::SyncTaskStatus;
use hub_scheduler::{ScheduledRun, Trigger};

use crate::cli::GlobalFlags;
use crate::cli::subcommands::SchedulerCommands;
use crate::context::AppContext;
use crate::output::output;

#[derive(Debug, Serialize)]
struct RunSummary {
    instance: String,
    registered: usize,
    cancelled_runs: usize,
}

#[derive(Debug, Serialize)]
struct TickEntry {
    task_id: String,
    #[serde(flatten)]
    run: ScheduledRun,
}

#[derive(Debug, Serialize)]
struct ScheduledTask {
    id: String,
    name: String,
    status: SyncTaskStatus,
    trigger: &'static str,
    next_run_time: Option<DateTime<Utc>>,
}

/// Handle `datahub scheduler`.
pub async fn handle(
    action: &SchedulerCommands,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    match action {
        SchedulerCommands::Run { instance } => {
            let scheduler = ctx.scheduler(instance.as_deref());
            let registered = scheduler.start().await?;
            eprintln!("scheduler running with {registered} task(s); Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            tracing::info!("interrupt received; waiting for in-flight runs");
            let stopping = scheduler.stop();
            tokio::pin!(stopping);
            let cancelled_runs = tokio::select! {
                () = &mut stopping => 0,
                _ = tokio::signal::ctrl_c() => {
                    let cancelled = ctx.orchestrator.registry().cancel_all();
                    tracing::warn!(cancelled, "second interrupt; cancelling in-flight runs");
                    stopping.await;
                    cancelled
                }
            };

            output(
                &RunSummary {
                    instance: instance
                        .clone()
                        .unwrap_or_else(|| ctx.config.scheduler.resolved_instance_id()),
                    registered,
                    cancelled_runs,
                },
                flags.format,
            )
        }
        SchedulerCommands::Tick { instance } => {
            let scheduler = ctx.scheduler(instance.as_deref());
            let mut entries = Vec::new();
            for task in ctx.service.list_due_tasks(Utc::now()).await? {
                let run = scheduler.execute_scheduled_task(&task.id).await?;
                entries.push(TickEntry {
                    task_id: task.id,
                    run,
                });
            }
            output(&entries, flags.format)
        }
        SchedulerCommands::List => {
            let mut tasks = Vec::new();
            for task in ctx.service.list_schedulable_tasks().await? {
                let trigger = match Trigger::for_task(&task) {
                    Ok(trigger) => trigger.kind(),
                    Err(e) => {
                        tracing::warn!(task_id = %task.id, error = %e, "unusable schedule");
                        continue;
                    }
                };
                tasks.push(ScheduledTask {
                    id: task.id,
                    name: task.name,
                    status: task.status,
                    trigger,
                    next_run_time: task.next_run_time,
                });
            }
            output(&tasks, flags.format)
        }
    }
}
