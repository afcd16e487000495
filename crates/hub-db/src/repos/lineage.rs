//! Record-level lineage. Insert-only.

use hub_core::entities::LineageRecord;

use crate::error::DatabaseError;
use crate::helpers::{format_datetime, get_opt_string, parse_datetime, parse_json, to_json};
use crate::service::HubService;

const SELECT_COLS: &str = "id, task_id, execution_id, thematic_interface_id, thematic_record_id, \
     source_library_id, source_interface_id, source_record_id, source_record_hash, \
     processing_rules, quality_score, quality_issues, processed_at";

fn row_to_lineage(row: &libsql::Row) -> Result<LineageRecord, DatabaseError> {
    Ok(LineageRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        execution_id: row.get(2)?,
        thematic_interface_id: row.get(3)?,
        thematic_record_id: row.get(4)?,
        source_library_id: get_opt_string(row, 5)?,
        source_interface_id: get_opt_string(row, 6)?,
        source_record_id: row.get(7)?,
        source_record_hash: row.get(8)?,
        processing_rules: parse_json(&row.get::<String>(9)?)?,
        quality_score: row.get(10)?,
        quality_issues: parse_json(&row.get::<String>(11)?)?,
        processed_at: parse_datetime(&row.get::<String>(12)?)?,
    })
}

impl HubService {
    /// Insert a batch of lineage records in one transaction.
    ///
    /// Records arrive with ids already assigned.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if any insert fails; nothing is written then.
    pub async fn insert_lineage(&self, records: &[LineageRecord]) -> Result<usize, DatabaseError> {
        if records.is_empty() {
            return Ok(0);
        }
        let tx = self.db().begin().await?;
        let result = async {
            for record in records {
                tx.execute(
                    &format!(
                        "INSERT INTO data_lineage ({SELECT_COLS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                    ),
                    libsql::params![
                        record.id.as_str(),
                        record.task_id.as_str(),
                        record.execution_id.as_str(),
                        record.thematic_interface_id.as_str(),
                        record.thematic_record_id.as_str(),
                        record.source_library_id.as_deref(),
                        record.source_interface_id.as_deref(),
                        record.source_record_id.as_str(),
                        record.source_record_hash.as_str(),
                        to_json(&record.processing_rules)?,
                        record.quality_score,
                        to_json(&record.quality_issues)?,
                        format_datetime(&record.processed_at)
                    ],
                )
                .await?;
            }
            Ok(records.len())
        }
        .await;
        tx.finish(result).await
    }

    /// Where a thematic record came from.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn lineage_for_record(
        &self,
        interface_id: &str,
        record_id: &str,
    ) -> Result<Vec<LineageRecord>, DatabaseError> {
        self.query_lineage(
            &format!(
                "SELECT {SELECT_COLS} FROM data_lineage
                 WHERE thematic_interface_id = ?1 AND thematic_record_id = ?2
                 ORDER BY processed_at DESC, id"
            ),
            libsql::params![interface_id, record_id],
        )
        .await
    }

    /// Every thematic record produced from a source record.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn impact_of_source(
        &self,
        library_id: &str,
        interface_id: &str,
        record_id: &str,
    ) -> Result<Vec<LineageRecord>, DatabaseError> {
        self.query_lineage(
            &format!(
                "SELECT {SELECT_COLS} FROM data_lineage
                 WHERE source_library_id = ?1 AND source_interface_id = ?2 AND source_record_id = ?3
                 ORDER BY processed_at DESC, id"
            ),
            libsql::params![library_id, interface_id, record_id],
        )
        .await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn lineage_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<LineageRecord>, DatabaseError> {
        self.query_lineage(
            &format!(
                "SELECT {SELECT_COLS} FROM data_lineage WHERE execution_id = ?1 ORDER BY rowid"
            ),
            [execution_id],
        )
        .await
    }

    async fn query_lineage(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<LineageRecord>, DatabaseError> {
        let mut rows = self.db().conn().query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_lineage(&row)?);
        }
        Ok(records)
    }
}
