use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{InterfaceType, RecordStatus};

const fn default_true() -> bool {
    true
}

/// A curated target dataset, physically a schema.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ThematicLibrary {
    pub id: String,
    /// Schema name.
    pub name_en: String,
    pub name_zh: String,
    pub description: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A table or view inside a thematic library.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ThematicInterface {
    pub id: String,
    pub library_id: String,
    /// Table or view name.
    pub name_en: String,
    pub name_zh: String,
    pub description: Option<String>,
    pub interface_type: InterfaceType,
    pub table_fields: Vec<TableField>,
    pub view_sql: Option<String>,
    pub is_table_created: bool,
    pub is_view_created: bool,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Declared column of a thematic table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct TableField {
    pub name_en: String,
    #[serde(default)]
    pub name_zh: String,
    pub data_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default = "default_true")]
    pub is_nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub order_num: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_increment_field: bool,
}

impl TableField {
    #[must_use]
    pub fn new(name_en: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name_en: name_en.into(),
            name_zh: String::new(),
            data_type: data_type.into(),
            is_primary_key: false,
            is_unique: false,
            is_nullable: true,
            default_value: None,
            order_num: 0,
            description: String::new(),
            is_increment_field: false,
        }
    }
}

/// A data-flow graph that writes into a thematic interface.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DataFlowGraph {
    pub id: String,
    pub name: String,
    pub thematic_interface_id: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

/// An API that reads from a thematic interface.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ApiInterface {
    pub id: String,
    pub name: String,
    pub thematic_interface_id: String,
    pub created_at: DateTime<Utc>,
}
