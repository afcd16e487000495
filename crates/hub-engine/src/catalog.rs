//! Catalog adapter: the database-side view of schemas, tables, and views.
//!
//! The reconciler only talks to the catalog through [`CatalogAdapter`].
//! [`MemoryCatalog`] backs tests; [`crate::warehouse::LocalWarehouse`] backs
//! the CLI.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hub_core::errors::CoreError;

/// A column as the catalog reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Declared type as the catalog spells it, e.g. `character varying(255)`.
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub default_value: Option<String>,
    pub comment: Option<String>,
    /// 1-based position in the table.
    pub ordinal: u32,
}

impl ColumnDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_primary_key: false,
            is_unique: false,
            default_value: None,
            comment: None,
            ordinal: 0,
        }
    }
}

/// Table DDL requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOperation {
    Create {
        schema: String,
        table: String,
        columns: Vec<ColumnDefinition>,
    },
    /// Bring an existing table to exactly `columns`.
    Alter {
        schema: String,
        table: String,
        columns: Vec<ColumnDefinition>,
    },
    Drop { schema: String, table: String },
}

impl TableOperation {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Alter { .. } => "alter",
            Self::Drop { .. } => "drop",
        }
    }
}

/// View DDL requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOperation {
    /// Create, or replace an existing view of the same name.
    CreateOrReplace {
        schema: String,
        view: String,
        sql: String,
    },
    Drop { schema: String, view: String },
}

#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    async fn schema_exists(&self, schema: &str) -> Result<bool, CoreError>;
    async fn create_schema(&self, schema: &str) -> Result<(), CoreError>;
    async fn delete_schema(&self, schema: &str) -> Result<(), CoreError>;
    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool, CoreError>;
    async fn view_exists(&self, schema: &str, view: &str) -> Result<bool, CoreError>;
    /// Columns in ordinal order. Empty when the table does not exist.
    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDefinition>, CoreError>;
    async fn manage_table(&self, op: TableOperation) -> Result<(), CoreError>;
    async fn manage_view(&self, op: ViewOperation) -> Result<(), CoreError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    schemas: BTreeMap<String, ()>,
    tables: BTreeMap<(String, String), Vec<ColumnDefinition>>,
    views: BTreeMap<(String, String), String>,
    ddl_log: Vec<String>,
}

/// Process-local catalog that records every DDL it applies.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table directly, bypassing the DDL log.
    pub fn insert_table(&self, schema: &str, table: &str, columns: Vec<ColumnDefinition>) {
        let mut state = self.lock();
        state.schemas.insert(schema.to_string(), ());
        state
            .tables
            .insert((schema.to_string(), table.to_string()), number(columns));
    }

    /// DDL statements applied so far, e.g. `alter population.residents`.
    #[must_use]
    pub fn ddl_log(&self) -> Vec<String> {
        self.lock().ddl_log.clone()
    }

    #[must_use]
    pub fn view_sql(&self, schema: &str, view: &str) -> Option<String> {
        self.lock()
            .views
            .get(&(schema.to_string(), view.to_string()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CatalogState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn number(mut columns: Vec<ColumnDefinition>) -> Vec<ColumnDefinition> {
    for (i, column) in columns.iter_mut().enumerate() {
        column.ordinal = u32::try_from(i + 1).unwrap_or(u32::MAX);
    }
    columns
}

fn key(schema: &str, name: &str) -> (String, String) {
    (schema.to_string(), name.to_string())
}

#[async_trait]
impl CatalogAdapter for MemoryCatalog {
    async fn schema_exists(&self, schema: &str) -> Result<bool, CoreError> {
        Ok(self.lock().schemas.contains_key(schema))
    }

    async fn create_schema(&self, schema: &str) -> Result<(), CoreError> {
        let mut state = self.lock();
        state.schemas.insert(schema.to_string(), ());
        state.ddl_log.push(format!("create schema {schema}"));
        Ok(())
    }

    async fn delete_schema(&self, schema: &str) -> Result<(), CoreError> {
        let mut state = self.lock();
        state.schemas.remove(schema);
        state.tables.retain(|(s, _), _| s != schema);
        state.views.retain(|(s, _), _| s != schema);
        state.ddl_log.push(format!("drop schema {schema}"));
        Ok(())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool, CoreError> {
        Ok(self.lock().tables.contains_key(&key(schema, table)))
    }

    async fn view_exists(&self, schema: &str, view: &str) -> Result<bool, CoreError> {
        Ok(self.lock().views.contains_key(&key(schema, view)))
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDefinition>, CoreError> {
        Ok(self
            .lock()
            .tables
            .get(&key(schema, table))
            .cloned()
            .unwrap_or_default())
    }

    async fn manage_table(&self, op: TableOperation) -> Result<(), CoreError> {
        let mut state = self.lock();
        match op {
            TableOperation::Create {
                schema,
                table,
                columns,
            } => {
                if !state.schemas.contains_key(&schema) {
                    return Err(CoreError::not_found("schema", schema));
                }
                if state.tables.contains_key(&key(&schema, &table)) {
                    return Err(CoreError::Conflict(format!("table {schema}.{table} exists")));
                }
                state.ddl_log.push(format!("create {schema}.{table}"));
                state.tables.insert(key(&schema, &table), number(columns));
            }
            TableOperation::Alter {
                schema,
                table,
                columns,
            } => {
                let Some(existing) = state.tables.get_mut(&key(&schema, &table)) else {
                    return Err(CoreError::not_found("table", format!("{schema}.{table}")));
                };
                *existing = number(columns);
                state.ddl_log.push(format!("alter {schema}.{table}"));
            }
            TableOperation::Drop { schema, table } => {
                state.tables.remove(&key(&schema, &table));
                state.ddl_log.push(format!("drop {schema}.{table}"));
            }
        }
        Ok(())
    }

    async fn manage_view(&self, op: ViewOperation) -> Result<(), CoreError> {
        let mut state = self.lock();
        match op {
            ViewOperation::CreateOrReplace { schema, view, sql } => {
                state.ddl_log.push(format!("create view {schema}.{view}"));
                state.views.insert(key(&schema, &view), sql);
            }
            ViewOperation::Drop { schema, view } => {
                state.views.remove(&key(&schema, &view));
                state.ddl_log.push(format!("drop view {schema}.{view}"));
            }
        }
        Ok(())
    }
}
