use clap::Subcommand;

/// Thematic library commands.
#[derive(Clone, Debug, Subcommand)]
pub enum LibraryCommands {
    /// Create a library and its warehouse schema.
    Create {
        /// Schema name: lowercase letters, digits and underscores.
        name: String,
        /// Display name.
        #[arg(long)]
        display: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List libraries.
    List {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Get a library by ID.
    Get { id: String },
}
