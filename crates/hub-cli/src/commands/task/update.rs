use std::path::Path;

use hub_db::updates::sync_task::SyncTaskUpdate;

use crate::cli::GlobalFlags;
use crate::commands::shared::input::read_json;
use crate::context::AppContext;
use crate::output::output;

/// Apply a partial update. Keys missing from the document stay as they are.
pub async fn run(
    task: &str,
    file: &Path,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let id = ctx.task_id(task).await?;
    let update: SyncTaskUpdate = read_json(file)?;
    let updated = ctx.tasks.update_task(&id, update).await?;
    output(&updated, flags.format)
}
