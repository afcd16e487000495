use anyhow::Context;
use hub_config::HubConfig;

use crate::cli::GlobalFlags;

/// Load `.env`, then the layered config, honouring `--config`.
pub fn load_config(flags: &GlobalFlags) -> anyhow::Result<HubConfig> {
    let config = match &flags.config {
        Some(path) => HubConfig::load_from_with_dotenv(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => HubConfig::load_with_dotenv().context("failed to load configuration")?,
    };
    config.validate().context("invalid configuration")?;
    tracing::debug!(
        database = %config.database.path,
        warehouse = %config.warehouse.path,
        "configuration loaded"
    );
    Ok(config)
}
