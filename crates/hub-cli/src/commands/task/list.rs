use hub_core::enums::SyncTaskStatus;
use hub_db::repos::sync_task::SyncTaskFilter;

use crate::cli::GlobalFlags;
use crate::commands::shared::limit::effective_limit;
use crate::commands::shared::parse::parse_enum;
use crate::context::AppContext;
use crate::output::output;

pub async fn run(
    status: Option<&str>,
    interface: Option<&str>,
    limit: Option<u32>,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let filter = SyncTaskFilter {
        status: status
            .map(|value| parse_enum::<SyncTaskStatus>(value, "status"))
            .transpose()?,
        interface_id: interface.map(str::to_string),
        limit: Some(effective_limit(
            limit,
            flags.limit,
            ctx.config.general.default_limit,
        )),
    };
    output(&ctx.tasks.list_tasks(&filter).await?, flags.format)
}
