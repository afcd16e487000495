//! Thematic library repository.

use hub_core::entities::ThematicLibrary;
use hub_core::enums::RecordStatus;
use hub_core::ids::{PREFIX_LIBRARY, is_valid_schema_name};

use crate::error::DatabaseError;
use crate::helpers::{format_datetime, get_opt_string, now, parse_datetime, parse_enum};
use crate::service::HubService;

const SELECT_COLS: &str = "id, name_en, name_zh, description, status, created_at, updated_at";

fn row_to_library(row: &libsql::Row) -> Result<ThematicLibrary, DatabaseError> {
    Ok(ThematicLibrary {
        id: row.get(0)?,
        name_en: row.get(1)?,
        name_zh: row.get(2)?,
        description: get_opt_string(row, 3)?,
        status: parse_enum(&row.get::<String>(4)?)?,
        created_at: parse_datetime(&row.get::<String>(5)?)?,
        updated_at: parse_datetime(&row.get::<String>(6)?)?,
    })
}

impl HubService {
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` for a bad schema name and
    /// `DatabaseError::Conflict` if the name is taken.
    pub async fn create_library(
        &self,
        name_en: &str,
        name_zh: &str,
        description: Option<&str>,
    ) -> Result<ThematicLibrary, DatabaseError> {
        if !is_valid_schema_name(name_en) {
            return Err(DatabaseError::InvalidState(format!(
                "'{name_en}' is not a valid schema name"
            )));
        }
        let now = now();
        let id = self.db().generate_id(PREFIX_LIBRARY).await?;
        self.db()
            .execute(
                &format!("INSERT INTO thematic_libraries ({SELECT_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                libsql::params![
                    id.as_str(),
                    name_en,
                    name_zh,
                    description,
                    RecordStatus::Active.as_str(),
                    format_datetime(&now),
                    format_datetime(&now)
                ],
            )
            .await
            .map_err(|e| match e {
                DatabaseError::LibSql(e) => DatabaseError::unique_or(e, || {
                    format!("thematic library '{name_en}' already exists")
                }),
                other => other,
            })?;

        Ok(ThematicLibrary {
            id,
            name_en: name_en.to_string(),
            name_zh: name_zh.to_string(),
            description: description.map(String::from),
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no library has this id.
    pub async fn get_library(&self, id: &str) -> Result<ThematicLibrary, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM thematic_libraries WHERE id = ?1"),
                [id],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::not_found("thematic library", id))?;
        row_to_library(&row)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_libraries(&self, limit: u32) -> Result<Vec<ThematicLibrary>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM thematic_libraries ORDER BY name_en LIMIT ?1"),
                libsql::params![i64::from(limit)],
            )
            .await?;
        let mut libraries = Vec::new();
        while let Some(row) = rows.next().await? {
            libraries.push(row_to_library(&row)?);
        }
        Ok(libraries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::helpers::test_service;

    #[tokio::test]
    async fn create_and_get_library() {
        let svc = test_service().await;
        let lib = svc
            .create_library("population", "Population", Some("census"))
            .await
            .unwrap();
        assert!(lib.id.starts_with("thl-"));
        let fetched = svc.get_library(&lib.id).await.unwrap();
        assert_eq!(fetched, lib);
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let svc = test_service().await;
        svc.create_library("population", "", None).await.unwrap();
        let err = svc.create_library("population", "", None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)), "{err}");
    }

    #[tokio::test]
    async fn rejects_bad_schema_name() {
        let svc = test_service().await;
        let err = svc.create_library("1population", "", None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidState(_)));
    }

    #[tokio::test]
    async fn missing_library_is_not_found() {
        let svc = test_service().await;
        let err = svc.get_library("thl-00000000").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
