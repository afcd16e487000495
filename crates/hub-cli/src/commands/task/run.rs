use std::time::Duration;

use hub_core::enums::ExecutionType;
use hub_core::errors::CoreError;
use hub_engine::SyncOptions;

use crate::cli::GlobalFlags;
use crate::context::AppContext;
use crate::output::output;
use crate::progress::RunProgress;

/// Command-line adjustments to the configured run options.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub dry_run: bool,
    pub max_records: Option<usize>,
    pub batch_size: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

impl RunOverrides {
    fn apply(&self, options: &mut SyncOptions) {
        options.dry_run = self.dry_run;
        if self.max_records.is_some() {
            options.max_records = self.max_records;
        }
        if let Some(size) = self.batch_size {
            options.batch_size = size.max(1);
        }
        if let Some(secs) = self.timeout_seconds {
            options.timeout = Duration::from_secs(secs.max(1));
        }
    }
}

/// Run a task in the foreground. Ctrl-C cancels the run and waits for it to
/// finalize as cancelled.
pub async fn run(
    task: &str,
    overrides: &RunOverrides,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let task = ctx.tasks.get_task(task).await?;
    let mut options = ctx.tasks.options(ExecutionType::Manual);
    overrides.apply(&mut options);

    let progress = RunProgress::new(&task.name);
    let (tx, drain) = progress.attach(ctx.config.sync.progress_buffer);

    let run = ctx.tasks.execute_now(&task.id, &options, Some(tx));
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(task_id = %task.id, "interrupt received; cancelling the run");
            ctx.orchestrator.registry().cancel(&task.id);
            run.await
        }
    };
    if let Err(e) = drain.await {
        tracing::debug!(error = %e, "progress drain ended abnormally");
    }

    match result {
        Ok(report) => {
            progress.finish(&report.status.to_string());
            output(&report, flags.format)
        }
        Err(CoreError::Cancelled { execution_id }) => {
            progress.abandon("cancelled");
            anyhow::bail!("execution {execution_id} was cancelled")
        }
        Err(e) => {
            progress.abandon("failed");
            Err(anyhow::Error::new(e).context(format!("sync task '{}' failed", task.name)))
        }
    }
}
