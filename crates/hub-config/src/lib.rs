//! # hub-config
//!
//! Layered configuration loading for the data hub using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`DATAHUB_*` prefix, `__` as separator)
//! 2. An explicit file passed with `--config`
//! 3. Project-level `.datahub/config.toml`
//! 4. User-level `~/.config/datahub/config.toml`
//! 5. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `DATAHUB_SCHEDULER__TICK_SECONDS` -> `scheduler.tick_seconds`,
//! `DATAHUB_SYNC__MAX_ROWS` -> `sync.max_rows`, etc.
//!
//! # Usage
//!
//! ```no_run
//! use hub_config::HubConfig;
//!
//! let config = HubConfig::load_with_dotenv().expect("config");
//! config.validate().expect("valid config");
//! println!("metadata store: {}", config.database.path);
//! ```

mod error;
mod general;
mod scheduler;
mod storage;
mod sync;

pub use error::ConfigError;
pub use general::GeneralConfig;
pub use scheduler::SchedulerConfig;
pub use storage::{DatabaseConfig, WarehouseConfig};
pub use sync::SyncConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-local config file, relative to the working directory.
pub const LOCAL_CONFIG_PATH: &str = ".datahub/config.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HubConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

impl HubConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy`; use [`Self::load_with_dotenv`] for `.env` support.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Figment` if a source cannot be parsed or extracted.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment(None).extract().map_err(ConfigError::from)
    }

    /// Load with an extra TOML file layered above the project config.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotConfigured` if the file does not exist, or
    /// `ConfigError::Figment` on parse failure.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotConfigured {
                section: path.display().to_string(),
            });
        }
        Self::figment(Some(path))
            .extract()
            .map_err(ConfigError::from)
    }

    /// Load configuration with `.env` file support.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`].
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        Self::load_dotenv_from_workspace();
        Self::load()
    }

    /// [`Self::load_from`] with `.env` support.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load_from`].
    pub fn load_from_with_dotenv(path: &Path) -> Result<Self, ConfigError> {
        Self::load_dotenv_from_workspace();
        Self::load_from(path)
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests can inspect the figment directly or add providers on top.
    #[must_use]
    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Layer 1: User-global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        // Layer 2: Project-local config
        let local_path = PathBuf::from(LOCAL_CONFIG_PATH);
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        // Layer 3: --config
        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 4: Environment variables (highest priority)
        figment.merge(Env::prefixed("DATAHUB_").split("__"))
    }

    /// Reject values that would stall or break the engine.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::invalid("database.path", "must not be empty"));
        }
        if self.scheduler.tick_seconds == 0 {
            return Err(ConfigError::invalid("scheduler.tick_seconds", "must be at least 1"));
        }
        if self.scheduler.lock_ttl_seconds == 0 {
            return Err(ConfigError::invalid(
                "scheduler.lock_ttl_seconds",
                "must be at least 1",
            ));
        }
        for (field, value) in [
            ("sync.batch_size", self.sync.batch_size),
            ("sync.max_rows", self.sync.max_rows),
            ("sync.parallel_workers", self.sync.parallel_workers),
            ("sync.progress_buffer", self.sync.progress_buffer),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
        }
        if self.general.max_page_size == 0 {
            return Err(ConfigError::invalid("general.max_page_size", "must be at least 1"));
        }
        if self.sync.query_timeout_seconds == 0 || self.sync.execution_timeout_seconds == 0 {
            return Err(ConfigError::invalid("sync", "timeouts must be at least 1 second"));
        }
        Ok(())
    }

    /// Path to the user-global config file.
    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("datahub").join("config.toml"))
    }

    /// Load `.env` from the workspace root.
    ///
    /// Walks up from `CARGO_MANIFEST_DIR` (if available) looking for a `.env`
    /// file, then falls back to the current directory.
    fn load_dotenv_from_workspace() {
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let mut dir = PathBuf::from(manifest_dir);
            // crate -> crates/ -> workspace root
            for _ in 0..3 {
                let env_path = dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                    return;
                }
                if !dir.pop() {
                    break;
                }
            }
        }

        let _ = dotenvy::dotenv();
    }
}
