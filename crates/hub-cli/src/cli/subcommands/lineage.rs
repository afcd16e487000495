use clap::Subcommand;

/// Lineage queries.
#[derive(Clone, Debug, Subcommand)]
pub enum LineageCommands {
    /// Where a thematic record came from.
    Record {
        #[arg(long)]
        interface: String,
        record: String,
    },
    /// What a source record fed into.
    Impact {
        #[arg(long)]
        library: String,
        #[arg(long)]
        interface: String,
        record: String,
    },
}
