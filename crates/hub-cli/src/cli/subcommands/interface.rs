use std::path::PathBuf;

use clap::Subcommand;

/// Thematic interface commands.
#[derive(Clone, Debug, Subcommand)]
pub enum InterfaceCommands {
    /// Create an interface. Tables get their physical table when fields are
    /// given; views are created from `--sql`.
    Create {
        #[arg(long)]
        library: String,
        /// Table name inside the library schema.
        name: String,
        /// realtime, batch or view.
        #[arg(long = "type", default_value = "batch")]
        interface_type: String,
        #[arg(long)]
        display: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// JSON file holding the field list.
        #[arg(long, conflicts_with = "sql")]
        fields: Option<PathBuf>,
        /// View SELECT.
        #[arg(long)]
        sql: Option<String>,
    },
    /// List interfaces.
    List {
        #[arg(long)]
        library: Option<String>,
    },
    /// Get an interface by ID.
    Get { id: String },
    /// Replace an interface's fields and bring its table in line.
    Fields {
        id: String,
        /// JSON file holding the field list.
        #[arg(long)]
        file: PathBuf,
    },
    /// Pull column drift from the warehouse back into the field config.
    Reconcile { id: String },
    /// Show, replace or drop a view's SQL.
    View {
        id: String,
        /// New SELECT for the view.
        #[arg(long, conflicts_with = "drop")]
        sql: Option<String>,
        #[arg(long)]
        drop: bool,
    },
    /// Delete an interface nothing references, with its table or view.
    Delete { id: String },
}
