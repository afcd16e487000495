use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use hub_config::{HubConfig, LOCAL_CONFIG_PATH};
use hub_db::service::HubService;
use hub_engine::LocalWarehouse;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::InitArgs;
use crate::output::output;

#[derive(Debug, Serialize)]
struct InitResponse {
    database: String,
    warehouse: String,
    config_file: String,
    config_written: bool,
}

/// Handle `datahub init`.
pub async fn handle(args: &InitArgs, config: &HubConfig, flags: &GlobalFlags) -> anyhow::Result<()> {
    for path in [&config.database.path, &config.warehouse.path] {
        create_parent(path)?;
    }

    // Opening runs the store's migrations and the warehouse bookkeeping DDL.
    HubService::new_local(&config.database.path)
        .await
        .context("failed to create the metadata store")?;
    LocalWarehouse::open_local(&config.warehouse.path)
        .await
        .context("failed to create the warehouse")?;

    let config_file = PathBuf::from(LOCAL_CONFIG_PATH);
    let config_written = if args.force || !config_file.exists() {
        write_config(&config_file, config)?;
        true
    } else {
        false
    };

    tracing::info!(database = %config.database.path, "data hub initialized");
    output(
        &InitResponse {
            database: config.database.path.clone(),
            warehouse: config.warehouse.path.clone(),
            config_file: config_file.display().to_string(),
            config_written,
        },
        flags.format,
    )
}

fn create_parent(path: &str) -> anyhow::Result<()> {
    if path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Defaults, with the storage paths this project resolved to.
fn write_config(path: &Path, resolved: &HubConfig) -> anyhow::Result<()> {
    let mut config = HubConfig::default();
    config.database = resolved.database.clone();
    config.warehouse = resolved.warehouse.clone();
    let body = toml::to_string_pretty(&config).context("failed to render the config file")?;
    create_parent(&path.to_string_lossy())?;
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_are_created_for_file_stores() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/.datahub/hub.db");
        create_parent(&db.to_string_lossy()).unwrap();
        assert!(dir.path().join("nested/.datahub").is_dir());
        create_parent(":memory:").unwrap();
    }

    #[test]
    fn written_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".datahub/config.toml");
        let mut resolved = HubConfig::default();
        resolved.database.path = "/srv/hub/meta.db".into();
        write_config(&path, &resolved).unwrap();

        let loaded: HubConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.database.path, "/srv/hub/meta.db");
        assert_eq!(loaded.scheduler.tick_seconds, HubConfig::default().scheduler.tick_seconds);
    }
}
