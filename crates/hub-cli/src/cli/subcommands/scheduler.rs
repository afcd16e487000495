use clap::Subcommand;

/// Scheduler commands.
#[derive(Clone, Debug, Subcommand)]
pub enum SchedulerCommands {
    /// Run the scheduler until Ctrl-C.
    Run {
        /// Lock owner identity; defaults to `scheduler.instance_id`.
        #[arg(long)]
        instance: Option<String>,
    },
    /// One pass: run every due task, then exit.
    Tick {
        #[arg(long)]
        instance: Option<String>,
    },
    /// Tasks the scheduler would pick up, with their next run time.
    List,
}
