use clap::{Args, Subcommand};

use crate::cli::subcommands::{
    InterfaceCommands, LibraryCommands, LineageCommands, SchedulerCommands, TaskCommands,
};

/// Top-level command tree.
#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Create `.datahub/` with the metadata store and local warehouse.
    Init(InitArgs),
    /// Thematic libraries.
    Library {
        #[command(subcommand)]
        action: LibraryCommands,
    },
    /// Thematic interfaces: tables and views.
    Interface {
        #[command(subcommand)]
        action: InterfaceCommands,
    },
    /// Sync tasks.
    Task {
        #[command(subcommand)]
        action: TaskCommands,
    },
    /// Execution history.
    Executions(ExecutionsArgs),
    /// Record-level lineage.
    Lineage {
        #[command(subcommand)]
        action: LineageCommands,
    },
    /// Run the scheduler.
    Scheduler {
        #[command(subcommand)]
        action: SchedulerCommands,
    },
    /// Print the JSON Schema of a rule document.
    Schema(SchemaArgs),
}

/// Arguments for `datahub init`.
#[derive(Clone, Debug, Args)]
pub struct InitArgs {
    /// Write `.datahub/config.toml` even if one exists.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `datahub executions`.
#[derive(Clone, Debug, Args)]
pub struct ExecutionsArgs {
    /// Task id or name.
    #[arg(long)]
    pub task: Option<String>,
    /// pending, running, success, failed or cancelled.
    #[arg(long)]
    pub status: Option<String>,
    /// manual or scheduled.
    #[arg(long = "type")]
    pub execution_type: Option<String>,
    /// RFC 3339 lower bound on the start time.
    #[arg(long)]
    pub since: Option<String>,
    /// RFC 3339 upper bound on the start time.
    #[arg(long)]
    pub until: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    /// Defaults to the global `--limit`, then `general.default_limit`.
    #[arg(long)]
    pub page_size: Option<u32>,
}

/// Arguments for `datahub schema`.
#[derive(Clone, Debug, Args)]
pub struct SchemaArgs {
    /// Document name, e.g. `data_source` or `quality-rules`. Lists the
    /// documents when omitted.
    pub document: Option<String>,
}
