use crate::cli::GlobalFlags;
use crate::cli::root_commands::Commands;
use crate::commands;
use crate::context::AppContext;

/// Route a parsed command to its handler. `init` and `schema` run before a
/// context exists and are handled in `main`.
pub async fn dispatch(command: Commands, ctx: &AppContext, flags: &GlobalFlags) -> anyhow::Result<()> {
    match command {
        Commands::Library { action } => commands::library::handle(&action, ctx, flags).await,
        Commands::Interface { action } => commands::interface::handle(&action, ctx, flags).await,
        Commands::Task { action } => commands::task::handle(&action, ctx, flags).await,
        Commands::Executions(args) => commands::executions::handle(&args, ctx, flags).await,
        Commands::Lineage { action } => commands::lineage::handle(&action, ctx, flags).await,
        Commands::Scheduler { action } => commands::scheduler::handle(&action, ctx, flags).await,
        Commands::Init(_) | Commands::Schema(_) => {
            anyhow::bail!("init and schema do not need an application context")
        }
    }
}
