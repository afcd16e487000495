use serde::Serialize;

use hub_engine::StopOutcome;

use crate::cli::GlobalFlags;
use crate::cli::subcommands::TaskCommands;
use crate::context::AppContext;
use crate::output::output;

mod create;
mod list;
mod run;
mod update;

#[derive(Debug, Serialize)]
struct StopResponse {
    task_id: String,
    outcome: StopOutcome,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    task_id: String,
    deleted: bool,
}

/// Handle `datahub task`.
pub async fn handle(
    action: &TaskCommands,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    match action {
        TaskCommands::Create { file } => create::run(file, ctx, flags).await,
        TaskCommands::List {
            status,
            interface,
            limit,
        } => list::run(status.as_deref(), interface.as_deref(), *limit, ctx, flags).await,
        TaskCommands::Get { task } => output(&ctx.tasks.get_task(task).await?, flags.format),
        TaskCommands::Update { task, file } => update::run(task, file, ctx, flags).await,
        TaskCommands::Activate { task } => {
            let id = ctx.task_id(task).await?;
            output(&ctx.tasks.activate_task(&id).await?, flags.format)
        }
        TaskCommands::Run {
            task,
            dry_run,
            max_records,
            batch_size,
            timeout,
        } => {
            let overrides = run::RunOverrides {
                dry_run: *dry_run,
                max_records: *max_records,
                batch_size: *batch_size,
                timeout_seconds: *timeout,
            };
            run::run(task, &overrides, ctx, flags).await
        }
        TaskCommands::Stop { task } => {
            let task_id = ctx.task_id(task).await?;
            let outcome = ctx.tasks.stop_task(&task_id).await?;
            output(&StopResponse { task_id, outcome }, flags.format)
        }
        TaskCommands::Delete { task } => {
            let task_id = ctx.task_id(task).await?;
            ctx.tasks.delete_task(&task_id).await?;
            output(
                &DeleteResponse {
                    task_id,
                    deleted: true,
                },
                flags.format,
            )
        }
        TaskCommands::Status { task } => {
            let id = ctx.task_id(task).await?;
            output(&ctx.tasks.task_status(&id).await?, flags.format)
        }
        TaskCommands::Stats { task } => {
            let id = ctx.task_id(task).await?;
            output(&ctx.tasks.task_statistics(&id).await?, flags.format)
        }
    }
}
