use hub_core::rules::RuleDocument;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::SchemaArgs;
use crate::output::output;

/// Handle `datahub schema`.
pub fn handle(args: &SchemaArgs, flags: &GlobalFlags) -> anyhow::Result<()> {
    let Some(name) = args.document.as_deref() else {
        let names: Vec<&str> = RuleDocument::ALL.iter().map(|doc| doc.as_str()).collect();
        return output(&names, flags.format);
    };
    let document = RuleDocument::from_name(name).ok_or_else(|| {
        anyhow::anyhow!("unknown rule document '{name}'. Run 'datahub schema' to list them.")
    })?;
    output(&document.json_schema(), flags.format)
}
