use std::path::PathBuf;

use clap::Subcommand;

/// Sync task commands. `task` accepts an id or a name.
#[derive(Clone, Debug, Subcommand)]
pub enum TaskCommands {
    /// Create a task from a JSON document.
    Create {
        #[arg(long)]
        file: PathBuf,
    },
    /// List tasks.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        interface: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Get a task.
    Get { task: String },
    /// Apply a partial JSON update.
    Update {
        task: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Put a task on its schedule.
    Activate { task: String },
    /// Run a task now.
    Run {
        task: String,
        /// Extract and govern without loading.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        max_records: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Whole-run timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Stop a task, cancelling its run if one is in flight here.
    Stop { task: String },
    /// Delete a task with its executions and lineage.
    Delete { task: String },
    /// Task, last execution and whether a run is in flight.
    Status { task: String },
    /// Execution statistics.
    Stats { task: String },
}
