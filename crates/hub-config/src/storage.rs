//! Metadata store and local warehouse locations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_database_path() -> String {
    ".datahub/hub.db".into()
}

fn default_warehouse_path() -> String {
    ".datahub/warehouse.db".into()
}

/// libSQL file holding tasks, executions, lineage, and thematic metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the database file. `:memory:` opens an in-memory store.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }

    /// Directory that must exist before the file can be opened.
    #[must_use]
    pub fn parent_dir(&self) -> Option<PathBuf> {
        if self.is_in_memory() {
            return None;
        }
        PathBuf::from(&self.path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
    }
}

/// Local libSQL warehouse used as source, sink, and catalog by the CLI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    #[serde(default = "default_warehouse_path")]
    pub path: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_datahub_dir() {
        let db = DatabaseConfig::default();
        assert_eq!(db.path, ".datahub/hub.db");
        assert_eq!(db.parent_dir(), Some(PathBuf::from(".datahub")));
        assert_eq!(WarehouseConfig::default().path, ".datahub/warehouse.db");
    }

    #[test]
    fn memory_store_has_no_parent() {
        let db = DatabaseConfig {
            path: ":memory:".into(),
        };
        assert!(db.is_in_memory());
        assert_eq!(db.parent_dir(), None);
    }
}
