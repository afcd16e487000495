//! Schema reconciler: keeps a thematic interface's physical table or view in
//! line with its declared configuration.
//!
//! DDL and metadata writes are separate steps, not one transaction. Every
//! operation is idempotent, so a partial failure is repaired by retrying.

pub mod merge;

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use hub_core::entities::{TableField, ThematicInterface, ThematicLibrary};
use hub_core::errors::CoreError;
use hub_db::service::HubService;

use crate::catalog::{CatalogAdapter, TableOperation, ViewOperation};
use crate::extraction::sql::validate_select;

pub use merge::{fields_equivalent, merge_fields, normalize_type, renumber};

/// What [`SchemaReconciler::apply_fields`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Identical configuration; nothing written.
    Unchanged,
    /// Only display metadata changed; config written, no DDL.
    MetadataUpdated,
    Created,
    Altered,
}

pub struct SchemaReconciler {
    svc: Arc<HubService>,
    catalog: Arc<dyn CatalogAdapter>,
}

impl SchemaReconciler {
    #[must_use]
    pub fn new(svc: Arc<HubService>, catalog: Arc<dyn CatalogAdapter>) -> Self {
        Self { svc, catalog }
    }

    async fn load(&self, interface_id: &str) -> Result<(ThematicInterface, ThematicLibrary), CoreError> {
        let interface = self.svc.get_interface(interface_id).await?;
        let library = self.svc.get_library(&interface.library_id).await?;
        Ok((interface, library))
    }

    fn require_table(interface: &ThematicInterface) -> Result<(), CoreError> {
        if interface.interface_type.is_view() {
            return Err(CoreError::Validation(format!(
                "interface {} is a view; its fields come from its SQL",
                interface.id
            )));
        }
        Ok(())
    }

    fn require_view(interface: &ThematicInterface) -> Result<(), CoreError> {
        if !interface.interface_type.is_view() {
            return Err(CoreError::Validation(format!(
                "interface {} is a {} table, not a view",
                interface.id, interface.interface_type
            )));
        }
        Ok(())
    }

    /// Create the library's schema if the catalog lacks it. Returns whether
    /// it was created.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown library.
    pub async fn ensure_schema(&self, library_id: &str) -> Result<bool, CoreError> {
        let library = self.svc.get_library(library_id).await?;
        if self.catalog.schema_exists(&library.name_en).await? {
            return Ok(false);
        }
        self.catalog.create_schema(&library.name_en).await?;
        info!(schema = %library.name_en, "schema created");
        Ok(true)
    }

    /// Pull the catalog's view of the table into the stored config.
    /// Returns whether the config changed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for a view interface.
    #[instrument(skip(self))]
    pub async fn sync_fields_from_catalog(&self, interface_id: &str) -> Result<bool, CoreError> {
        let (interface, library) = self.load(interface_id).await?;
        Self::require_table(&interface)?;
        if !self
            .catalog
            .table_exists(&library.name_en, &interface.name_en)
            .await?
        {
            return Ok(false);
        }
        let columns = self
            .catalog
            .table_columns(&library.name_en, &interface.name_en)
            .await?;
        let merged = merge_fields(&columns, &interface.table_fields);
        if fields_equivalent(&interface.table_fields, &merged) {
            return Ok(false);
        }
        info!(
            interface_id,
            stored = interface.table_fields.len(),
            actual = columns.len(),
            "field drift detected; config updated from catalog"
        );
        self.svc.update_interface_fields(interface_id, &merged).await?;
        if !interface.is_table_created {
            self.svc.set_table_created(interface_id, true).await?;
        }
        Ok(true)
    }

    /// Push a declared field list to the config and the catalog.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for a view interface or a bad field list.
    #[instrument(skip(self, fields), fields(count = fields.len()))]
    pub async fn apply_fields(
        &self,
        interface_id: &str,
        fields: Vec<TableField>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let (interface, library) = self.load(interface_id).await?;
        Self::require_table(&interface)?;
        merge::validate_fields(&fields)?;
        let mut fields = fields;
        renumber(&mut fields);

        let schema = library.name_en.as_str();
        let table = interface.name_en.as_str();
        let exists = self.catalog.table_exists(schema, table).await?;

        if exists && interface.is_table_created && fields_equivalent(&interface.table_fields, &fields)
        {
            if interface.table_fields == fields {
                return Ok(ReconcileOutcome::Unchanged);
            }
            self.svc.update_interface_fields(interface_id, &fields).await?;
            return Ok(ReconcileOutcome::MetadataUpdated);
        }

        self.svc.update_interface_fields(interface_id, &fields).await?;
        let columns = merge::to_columns(&fields);
        let outcome = if exists {
            self.catalog
                .manage_table(TableOperation::Alter {
                    schema: schema.into(),
                    table: table.into(),
                    columns,
                })
                .await?;
            ReconcileOutcome::Altered
        } else {
            self.ensure_schema(&library.id).await?;
            self.catalog
                .manage_table(TableOperation::Create {
                    schema: schema.into(),
                    table: table.into(),
                    columns,
                })
                .await?;
            ReconcileOutcome::Created
        };
        self.svc.set_table_created(interface_id, true).await?;
        info!(interface_id, schema, table, ?outcome, "table reconciled");
        Ok(outcome)
    }

    /// Create the interface's view, replacing one that already exists.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for a table interface or non-SELECT SQL.
    pub async fn create_view(&self, interface_id: &str, sql: &str) -> Result<(), CoreError> {
        let (interface, library) = self.load(interface_id).await?;
        Self::require_view(&interface)?;
        validate_select(sql)?;
        self.ensure_schema(&library.id).await?;
        self.catalog
            .manage_view(ViewOperation::CreateOrReplace {
                schema: library.name_en.clone(),
                view: interface.name_en.clone(),
                sql: sql.to_string(),
            })
            .await?;
        self.svc.set_view_state(interface_id, Some(sql), true).await?;
        info!(interface_id, view = %interface.name_en, "view created");
        Ok(())
    }

    /// Replace the SQL of an existing view.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the view does not exist yet.
    pub async fn update_view(&self, interface_id: &str, sql: &str) -> Result<(), CoreError> {
        let (interface, library) = self.load(interface_id).await?;
        Self::require_view(&interface)?;
        validate_select(sql)?;
        if !self
            .catalog
            .view_exists(&library.name_en, &interface.name_en)
            .await?
        {
            return Err(CoreError::not_found(
                "view",
                format!("{}.{}", library.name_en, interface.name_en),
            ));
        }
        self.catalog
            .manage_view(ViewOperation::CreateOrReplace {
                schema: library.name_en.clone(),
                view: interface.name_en.clone(),
                sql: sql.to_string(),
            })
            .await?;
        self.svc.set_view_state(interface_id, Some(sql), true).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `CoreError::Validation` for a table interface.
    pub async fn drop_view(&self, interface_id: &str) -> Result<(), CoreError> {
        let (interface, library) = self.load(interface_id).await?;
        Self::require_view(&interface)?;
        self.catalog
            .manage_view(ViewOperation::Drop {
                schema: library.name_en.clone(),
                view: interface.name_en.clone(),
            })
            .await?;
        self.svc.set_view_state(interface_id, Some(""), false).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `CoreError::Validation` for a table interface.
    pub async fn view_sql(&self, interface_id: &str) -> Result<Option<String>, CoreError> {
        let interface = self.svc.get_interface(interface_id).await?;
        Self::require_view(&interface)?;
        Ok(interface.view_sql)
    }

    /// Delete an interface that nothing references, then its table or view.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Conflict` naming the first blocking reference; in
    /// that case nothing is removed.
    #[instrument(skip(self))]
    pub async fn delete_interface(&self, interface_id: &str) -> Result<(), CoreError> {
        let (interface, library) = self.load(interface_id).await?;
        self.svc.delete_interface_checked(interface_id).await?;

        let schema = library.name_en;
        let name = interface.name_en;
        let dropped = if interface.interface_type.is_view() {
            if !interface.is_view_created {
                return Ok(());
            }
            self.catalog
                .manage_view(ViewOperation::Drop {
                    schema: schema.clone(),
                    view: name.clone(),
                })
                .await
        } else {
            if !interface.is_table_created {
                return Ok(());
            }
            self.catalog
                .manage_table(TableOperation::Drop {
                    schema: schema.clone(),
                    table: name.clone(),
                })
                .await
        };
        if let Err(e) = dropped {
            warn!(interface_id, %schema, %name, error = %e, "interface deleted but its object was not dropped");
        }
        Ok(())
    }
}
