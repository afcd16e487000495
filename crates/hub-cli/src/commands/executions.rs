use hub_core::enums::{ExecutionStatus, ExecutionType};
use hub_db::repos::execution::ExecutionFilter;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::ExecutionsArgs;
use crate::commands::shared::limit::effective_limit;
use crate::commands::shared::parse::{parse_enum, parse_time};
use crate::context::AppContext;
use crate::output::output;

/// Handle `datahub executions`.
pub async fn handle(args: &ExecutionsArgs, ctx: &AppContext, flags: &GlobalFlags) -> anyhow::Result<()> {
    let task_id = match &args.task {
        Some(task) => Some(ctx.task_id(task).await?),
        None => None,
    };
    let filter = ExecutionFilter {
        task_id,
        status: args
            .status
            .as_deref()
            .map(|s| parse_enum::<ExecutionStatus>(s, "status"))
            .transpose()?,
        execution_type: args
            .execution_type
            .as_deref()
            .map(|s| parse_enum::<ExecutionType>(s, "type"))
            .transpose()?,
        started_after: args.since.as_deref().map(|s| parse_time(s, "since")).transpose()?,
        started_before: args.until.as_deref().map(|s| parse_time(s, "until")).transpose()?,
        page: args.page.max(1),
        page_size: ctx.config.general.page_size(effective_limit(
            args.page_size,
            flags.limit,
            ctx.config.general.default_limit,
        )),
    };
    let page = ctx.tasks.list_executions(&filter).await?;
    // Tables show the rows; the paging envelope is for json.
    match flags.format {
        crate::cli::OutputFormat::Table => output(&page.executions, flags.format),
        _ => output(&page, flags.format),
    }
}
