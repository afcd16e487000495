use std::path::Path;

use hub_core::entities::NewSyncTask;

use crate::cli::GlobalFlags;
use crate::commands::shared::input::read_json;
use crate::context::AppContext;
use crate::output::output;

pub async fn run(file: &Path, ctx: &AppContext, flags: &GlobalFlags) -> anyhow::Result<()> {
    let input: NewSyncTask = read_json(file)?;
    let task = ctx.tasks.create_task(&input).await?;
    tracing::info!(task_id = %task.id, name = %task.name, "sync task created");
    output(&task, flags.format)
}
