use crate::cli::GlobalFlags;
use crate::cli::subcommands::LibraryCommands;
use crate::commands::shared::limit::effective_limit;
use crate::context::AppContext;
use crate::output::output;

/// Handle `datahub library`.
pub async fn handle(
    action: &LibraryCommands,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    match action {
        LibraryCommands::Create {
            name,
            display,
            description,
        } => {
            let library = ctx
                .service
                .create_library(name, display.as_deref().unwrap_or(name), description.as_deref())
                .await?;
            ctx.reconciler.ensure_schema(&library.id).await?;
            output(&library, flags.format)
        }
        LibraryCommands::List { limit } => {
            let limit = effective_limit(*limit, flags.limit, ctx.config.general.default_limit);
            output(&ctx.service.list_libraries(limit).await?, flags.format)
        }
        LibraryCommands::Get { id } => output(&ctx.service.get_library(id).await?, flags.format),
    }
}
