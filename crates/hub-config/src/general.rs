//! Listing and paging defaults shared by the CLI commands.

use serde::{Deserialize, Serialize};

const fn default_limit() -> u32 {
    20
}

const fn default_max_page_size() -> u32 {
    500
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Rows returned by list commands when no `--limit` is given.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Hard ceiling on a single page of execution history.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl GeneralConfig {
    /// Clamp a requested page size into `1..=max_page_size`.
    #[must_use]
    pub fn page_size(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_page_size.max(1))
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_page_size: default_max_page_size(),
        }
    }
}
