use crate::cli::GlobalFlags;
use crate::cli::subcommands::LineageCommands;
use crate::context::AppContext;
use crate::output::output;

/// Handle `datahub lineage`.
pub async fn handle(
    action: &LineageCommands,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let records = match action {
        LineageCommands::Record { interface, record } => {
            ctx.tasks.lineage_for_record(interface, record).await?
        }
        LineageCommands::Impact {
            library,
            interface,
            record,
        } => ctx.tasks.impact_of_source(library, interface, record).await?,
    };
    output(&records, flags.format)
}
