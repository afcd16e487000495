//! Thematic interface repository, plus the flow graphs and API interfaces
//! that hang off an interface and guard its deletion.

use hub_core::entities::{ApiInterface, DataFlowGraph, TableField, ThematicInterface};
use hub_core::enums::{InterfaceType, RecordStatus};
use hub_core::ids::{PREFIX_API_INTERFACE, PREFIX_FLOW_GRAPH, PREFIX_INTERFACE, is_valid_identifier};

use crate::error::DatabaseError;
use crate::helpers::{
    format_datetime, get_bool, get_opt_string, now, parse_datetime, parse_enum, parse_json,
    to_json,
};
use crate::service::HubService;

const SELECT_COLS: &str = "id, library_id, name_en, name_zh, description, interface_type, \
     table_fields, view_sql, is_table_created, is_view_created, status, created_at, updated_at";

/// Input for [`HubService::create_interface`].
#[derive(Debug, Clone)]
pub struct NewInterface {
    pub library_id: String,
    pub name_en: String,
    pub name_zh: String,
    pub description: Option<String>,
    pub interface_type: InterfaceType,
    pub table_fields: Vec<TableField>,
    pub view_sql: Option<String>,
}

impl NewInterface {
    #[must_use]
    pub fn new(
        library_id: impl Into<String>,
        name_en: impl Into<String>,
        interface_type: InterfaceType,
    ) -> Self {
        Self {
            library_id: library_id.into(),
            name_en: name_en.into(),
            name_zh: String::new(),
            description: None,
            interface_type,
            table_fields: Vec::new(),
            view_sql: None,
        }
    }

    #[must_use]
    pub fn with_fields(mut self, fields: Vec<TableField>) -> Self {
        self.table_fields = fields;
        self
    }

    #[must_use]
    pub fn with_view_sql(mut self, sql: impl Into<String>) -> Self {
        self.view_sql = Some(sql.into());
        self
    }
}

fn row_to_interface(row: &libsql::Row) -> Result<ThematicInterface, DatabaseError> {
    Ok(ThematicInterface {
        id: row.get(0)?,
        library_id: row.get(1)?,
        name_en: row.get(2)?,
        name_zh: row.get(3)?,
        description: get_opt_string(row, 4)?,
        interface_type: parse_enum(&row.get::<String>(5)?)?,
        table_fields: parse_json(&row.get::<String>(6)?)?,
        view_sql: get_opt_string(row, 7)?,
        is_table_created: get_bool(row, 8)?,
        is_view_created: get_bool(row, 9)?,
        status: parse_enum(&row.get::<String>(10)?)?,
        created_at: parse_datetime(&row.get::<String>(11)?)?,
        updated_at: parse_datetime(&row.get::<String>(12)?)?,
    })
}

fn bool_param(b: bool) -> i64 {
    i64::from(b)
}

impl HubService {
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if the library does not exist,
    /// `DatabaseError::InvalidState` for a bad table name, and
    /// `DatabaseError::Conflict` if the library already has an interface
    /// with this name.
    pub async fn create_interface(
        &self,
        input: &NewInterface,
    ) -> Result<ThematicInterface, DatabaseError> {
        if !is_valid_identifier(&input.name_en) {
            return Err(DatabaseError::InvalidState(format!(
                "'{}' is not a valid table name",
                input.name_en
            )));
        }
        self.get_library(&input.library_id).await?;

        let now = now();
        let id = self.db().generate_id(PREFIX_INTERFACE).await?;
        self.db()
            .execute(
                &format!(
                    "INSERT INTO thematic_interfaces ({SELECT_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9, ?10, ?11)"
                ),
                libsql::params![
                    id.as_str(),
                    input.library_id.as_str(),
                    input.name_en.as_str(),
                    input.name_zh.as_str(),
                    input.description.as_deref(),
                    input.interface_type.as_str(),
                    to_json(&input.table_fields)?,
                    input.view_sql.as_deref(),
                    RecordStatus::Active.as_str(),
                    format_datetime(&now),
                    format_datetime(&now)
                ],
            )
            .await
            .map_err(|e| match e {
                DatabaseError::LibSql(e) => DatabaseError::unique_or(e, || {
                    format!("interface '{}' already exists in this library", input.name_en)
                }),
                other => other,
            })?;

        Ok(ThematicInterface {
            id,
            library_id: input.library_id.clone(),
            name_en: input.name_en.clone(),
            name_zh: input.name_zh.clone(),
            description: input.description.clone(),
            interface_type: input.interface_type,
            table_fields: input.table_fields.clone(),
            view_sql: input.view_sql.clone(),
            is_table_created: false,
            is_view_created: false,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no interface has this id.
    pub async fn get_interface(&self, id: &str) -> Result<ThematicInterface, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM thematic_interfaces WHERE id = ?1"),
                [id],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::not_found("thematic interface", id))?;
        row_to_interface(&row)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_interfaces(
        &self,
        library_id: Option<&str>,
    ) -> Result<Vec<ThematicInterface>, DatabaseError> {
        let mut rows = match library_id {
            Some(library_id) => {
                self.db()
                    .conn()
                    .query(
                        &format!(
                            "SELECT {SELECT_COLS} FROM thematic_interfaces
                             WHERE library_id = ?1 ORDER BY name_en"
                        ),
                        [library_id],
                    )
                    .await?
            }
            None => {
                self.db()
                    .conn()
                    .query(
                        &format!("SELECT {SELECT_COLS} FROM thematic_interfaces ORDER BY name_en"),
                        (),
                    )
                    .await?
            }
        };
        let mut interfaces = Vec::new();
        while let Some(row) = rows.next().await? {
            interfaces.push(row_to_interface(&row)?);
        }
        Ok(interfaces)
    }

    /// Replace the stored field metadata.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no interface has this id.
    pub async fn update_interface_fields(
        &self,
        id: &str,
        fields: &[TableField],
    ) -> Result<ThematicInterface, DatabaseError> {
        let changed = self
            .db()
            .execute(
                "UPDATE thematic_interfaces SET table_fields = ?1, updated_at = ?2 WHERE id = ?3",
                libsql::params![to_json(fields)?, format_datetime(&now()), id],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::not_found("thematic interface", id));
        }
        self.get_interface(id).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no interface has this id.
    pub async fn set_table_created(&self, id: &str, created: bool) -> Result<(), DatabaseError> {
        let changed = self
            .db()
            .execute(
                "UPDATE thematic_interfaces SET is_table_created = ?1, updated_at = ?2 WHERE id = ?3",
                libsql::params![bool_param(created), format_datetime(&now()), id],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::not_found("thematic interface", id));
        }
        Ok(())
    }

    /// Record the view definition and whether it currently exists.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no interface has this id.
    pub async fn set_view_state(
        &self,
        id: &str,
        view_sql: Option<&str>,
        created: bool,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .db()
            .execute(
                "UPDATE thematic_interfaces
                 SET view_sql = COALESCE(?1, view_sql), is_view_created = ?2, updated_at = ?3
                 WHERE id = ?4",
                libsql::params![view_sql, bool_param(created), format_datetime(&now()), id],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::not_found("thematic interface", id));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if the interface does not exist.
    pub async fn create_flow_graph(
        &self,
        interface_id: &str,
        name: &str,
        status: RecordStatus,
    ) -> Result<DataFlowGraph, DatabaseError> {
        self.get_interface(interface_id).await?;
        let now = now();
        let id = self.db().generate_id(PREFIX_FLOW_GRAPH).await?;
        self.db()
            .execute(
                "INSERT INTO data_flow_graphs (id, name, thematic_interface_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                libsql::params![
                    id.as_str(),
                    name,
                    interface_id,
                    status.as_str(),
                    format_datetime(&now)
                ],
            )
            .await?;
        Ok(DataFlowGraph {
            id,
            name: name.to_string(),
            thematic_interface_id: interface_id.to_string(),
            status,
            created_at: now,
        })
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if the interface does not exist.
    pub async fn create_api_interface(
        &self,
        interface_id: &str,
        name: &str,
    ) -> Result<ApiInterface, DatabaseError> {
        self.get_interface(interface_id).await?;
        let now = now();
        let id = self.db().generate_id(PREFIX_API_INTERFACE).await?;
        self.db()
            .execute(
                "INSERT INTO api_interfaces (id, name, thematic_interface_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                libsql::params![id.as_str(), name, interface_id, format_datetime(&now)],
            )
            .await?;
        Ok(ApiInterface {
            id,
            name: name.to_string(),
            thematic_interface_id: interface_id.to_string(),
            created_at: now,
        })
    }

    /// Delete an interface unless something still depends on it.
    ///
    /// The dependency checks and the delete share one transaction. Active flow
    /// graphs, API interfaces, and sync tasks all block the delete; inactive
    /// flow graphs are removed with the interface.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if the interface does not exist and
    /// `DatabaseError::Conflict` naming the first blocking dependency.
    pub async fn delete_interface_checked(&self, id: &str) -> Result<(), DatabaseError> {
        let tx = self.db().begin().await?;
        let result = async {
            let exists = tx
                .count("SELECT COUNT(*) FROM thematic_interfaces WHERE id = ?1", [id])
                .await?;
            if exists == 0 {
                return Err(DatabaseError::not_found("thematic interface", id));
            }

            let graphs = tx
                .count(
                    "SELECT COUNT(*) FROM data_flow_graphs
                     WHERE thematic_interface_id = ?1 AND status != 'inactive'",
                    [id],
                )
                .await?;
            if graphs > 0 {
                return Err(DatabaseError::Conflict(format!(
                    "interface {id} is used by {graphs} active data flow graph(s)"
                )));
            }

            let apis = tx
                .count(
                    "SELECT COUNT(*) FROM api_interfaces WHERE thematic_interface_id = ?1",
                    [id],
                )
                .await?;
            if apis > 0 {
                return Err(DatabaseError::Conflict(format!(
                    "interface {id} is exposed by {apis} API interface(s)"
                )));
            }

            let tasks = tx
                .count("SELECT COUNT(*) FROM sync_tasks WHERE interface_id = ?1", [id])
                .await?;
            if tasks > 0 {
                return Err(DatabaseError::Conflict(format!(
                    "interface {id} is the target of {tasks} sync task(s)"
                )));
            }

            tx.execute("DELETE FROM thematic_interfaces WHERE id = ?1", [id])
                .await?;
            Ok(())
        }
        .await;
        tx.finish(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::helpers::{seed_target, seed_task, test_service};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn create_interface_roundtrips_fields() {
        let svc = test_service().await;
        let lib = svc.create_library("population", "", None).await.unwrap();
        let mut id_field = TableField::new("id", "varchar");
        id_field.is_primary_key = true;
        id_field.is_nullable = false;
        id_field.order_num = 1;
        let created = svc
            .create_interface(
                &NewInterface::new(&lib.id, "residents", InterfaceType::Batch)
                    .with_fields(vec![id_field]),
            )
            .await
            .unwrap();

        let fetched = svc.get_interface(&created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.table_fields.len(), 1);
        assert!(fetched.table_fields[0].is_primary_key);
    }

    #[tokio::test]
    async fn interface_requires_existing_library() {
        let svc = test_service().await;
        let err = svc
            .create_interface(&NewInterface::new("thl-missing", "t", InterfaceType::Batch))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn view_state_keeps_sql_when_none_given() {
        let svc = test_service().await;
        let lib = svc.create_library("population", "", None).await.unwrap();
        let view = svc
            .create_interface(
                &NewInterface::new(&lib.id, "adults", InterfaceType::View)
                    .with_view_sql("SELECT * FROM residents WHERE age >= 18"),
            )
            .await
            .unwrap();

        svc.set_view_state(&view.id, None, true).await.unwrap();
        let fetched = svc.get_interface(&view.id).await.unwrap();
        assert!(fetched.is_view_created);
        assert_eq!(
            fetched.view_sql.as_deref(),
            Some("SELECT * FROM residents WHERE age >= 18")
        );
    }

    #[tokio::test]
    async fn delete_blocked_by_active_flow_graph() {
        let svc = test_service().await;
        let (_, iface) = seed_target(&svc).await;
        svc.create_flow_graph(&iface.id, "ingest", RecordStatus::Active)
            .await
            .unwrap();

        let err = svc.delete_interface_checked(&iface.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)), "{err}");
        assert!(svc.get_interface(&iface.id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_ignores_inactive_flow_graph() {
        let svc = test_service().await;
        let (_, iface) = seed_target(&svc).await;
        svc.create_flow_graph(&iface.id, "old", RecordStatus::Inactive)
            .await
            .unwrap();

        svc.delete_interface_checked(&iface.id).await.unwrap();
        let err = svc.get_interface(&iface.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_blocked_by_api_interface() {
        let svc = test_service().await;
        let (_, iface) = seed_target(&svc).await;
        svc.create_api_interface(&iface.id, "residents_api")
            .await
            .unwrap();
        let err = svc.delete_interface_checked(&iface.id).await.unwrap_err();
        assert!(err.to_string().contains("API"), "{err}");
    }

    #[tokio::test]
    async fn delete_blocked_by_sync_task() {
        let svc = test_service().await;
        let task = seed_task(&svc, "nightly").await;
        let err = svc
            .delete_interface_checked(&task.interface_id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sync task"), "{err}");
    }

    #[tokio::test]
    async fn list_interfaces_filters_by_library() {
        let svc = test_service().await;
        let (lib, _) = seed_target(&svc).await;
        let other = svc.create_library("economy", "", None).await.unwrap();
        svc.create_interface(&NewInterface::new(&other.id, "gdp", InterfaceType::Batch))
            .await
            .unwrap();

        assert_eq!(svc.list_interfaces(Some(&lib.id)).await.unwrap().len(), 1);
        assert_eq!(svc.list_interfaces(None).await.unwrap().len(), 2);
    }
}
