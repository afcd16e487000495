//! Execution records: created at run start, finalized once, then immutable.

use chrono::{DateTime, Utc};
use serde::Serialize;

use hub_core::entities::{ExecutionCounts, SyncExecution, TaskStatistics};
use hub_core::enums::{ExecutionStatus, ExecutionType};
use hub_core::ids::PREFIX_EXECUTION;

use crate::error::DatabaseError;
use crate::helpers::{
    count_param, format_datetime, get_count, get_opt_string, now, parse_datetime, parse_enum,
    parse_optional_datetime, parse_optional_json, to_json,
};
use crate::service::HubService;

const SELECT_COLS: &str = "id, task_id, execution_type, status, started_at, finished_at, \
     duration_ms, source_records, processed_records, inserted_records, updated_records, \
     error_records, result, error_details";

const RECENT_EXECUTIONS: u32 = 10;

/// Filter and paging for [`HubService::list_executions`]. Pages start at 1.
#[derive(Debug, Default)]
pub struct ExecutionFilter {
    pub task_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub execution_type: Option<ExecutionType>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPage {
    pub executions: Vec<SyncExecution>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

fn row_to_execution(row: &libsql::Row) -> Result<SyncExecution, DatabaseError> {
    Ok(SyncExecution {
        id: row.get(0)?,
        task_id: row.get(1)?,
        execution_type: parse_enum(&row.get::<String>(2)?)?,
        status: parse_enum(&row.get::<String>(3)?)?,
        started_at: parse_datetime(&row.get::<String>(4)?)?,
        finished_at: parse_optional_datetime(get_opt_string(row, 5)?.as_deref())?,
        duration_ms: row
            .get::<Option<i64>>(6)?
            .map(|ms| u64::try_from(ms).unwrap_or(0)),
        counts: ExecutionCounts {
            source_records: get_count(row, 7)?,
            processed_records: get_count(row, 8)?,
            inserted_records: get_count(row, 9)?,
            updated_records: get_count(row, 10)?,
            error_records: get_count(row, 11)?,
        },
        result: parse_optional_json(get_opt_string(row, 12)?.as_deref())?,
        error_details: get_opt_string(row, 13)?,
    })
}

impl HubService {
    /// Open a `running` execution for a task.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the insert fails (e.g. unknown task).
    pub async fn create_execution(
        &self,
        task_id: &str,
        execution_type: ExecutionType,
    ) -> Result<SyncExecution, DatabaseError> {
        let now = now();
        let id = self.db().generate_id(PREFIX_EXECUTION).await?;
        self.db()
            .execute(
                "INSERT INTO sync_executions (id, task_id, execution_type, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                libsql::params![
                    id.as_str(),
                    task_id,
                    execution_type.as_str(),
                    ExecutionStatus::Running.as_str(),
                    format_datetime(&now)
                ],
            )
            .await?;
        Ok(SyncExecution {
            id,
            task_id: task_id.to_string(),
            execution_type,
            status: ExecutionStatus::Running,
            started_at: now,
            finished_at: None,
            duration_ms: None,
            counts: ExecutionCounts::default(),
            result: None,
            error_details: None,
        })
    }

    /// Close a running execution with its terminal status and counts.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if `status` is not terminal or
    /// the execution was already finalized, and `DatabaseError::NotFound` if
    /// it does not exist.
    pub async fn finalize_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        counts: ExecutionCounts,
        result: Option<&serde_json::Value>,
        error_details: Option<&str>,
    ) -> Result<SyncExecution, DatabaseError> {
        if !status.is_terminal() {
            return Err(DatabaseError::InvalidState(format!(
                "cannot finalize execution {id} as {status}"
            )));
        }
        let current = self.get_execution(id).await?;
        let finished = now();
        let duration_ms = (finished - current.started_at).num_milliseconds().max(0);
        let result = result.map(to_json).transpose()?;

        let changed = self
            .db()
            .execute(
                "UPDATE sync_executions SET
                    status = ?1, finished_at = ?2, duration_ms = ?3,
                    source_records = ?4, processed_records = ?5, inserted_records = ?6,
                    updated_records = ?7, error_records = ?8, result = ?9, error_details = ?10
                 WHERE id = ?11 AND status = 'running'",
                libsql::params![
                    status.as_str(),
                    format_datetime(&finished),
                    duration_ms,
                    count_param(counts.source_records),
                    count_param(counts.processed_records),
                    count_param(counts.inserted_records),
                    count_param(counts.updated_records),
                    count_param(counts.error_records),
                    result,
                    error_details,
                    id
                ],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::InvalidState(format!(
                "execution {id} is already {}",
                current.status
            )));
        }
        self.get_execution(id).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no execution has this id.
    pub async fn get_execution(&self, id: &str) -> Result<SyncExecution, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM sync_executions WHERE id = ?1"),
                [id],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::not_found("execution", id))?;
        row_to_execution(&row)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn latest_execution(
        &self,
        task_id: &str,
    ) -> Result<Option<SyncExecution>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM sync_executions
                     WHERE task_id = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1"
                ),
                [task_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_execution(&row)?)),
            None => Ok(None),
        }
    }

    /// Executions matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<ExecutionPage, DatabaseError> {
        let mut conditions = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        let mut idx = 1usize;

        if let Some(ref task_id) = filter.task_id {
            conditions.push(format!("task_id = ?{idx}"));
            params.push(task_id.clone().into());
            idx += 1;
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{idx}"));
            params.push(status.as_str().into());
            idx += 1;
        }
        if let Some(execution_type) = filter.execution_type {
            conditions.push(format!("execution_type = ?{idx}"));
            params.push(execution_type.as_str().into());
            idx += 1;
        }
        if let Some(ref after) = filter.started_after {
            conditions.push(format!("started_at >= ?{idx}"));
            params.push(format_datetime(after).into());
            idx += 1;
        }
        if let Some(ref before) = filter.started_before {
            conditions.push(format!("started_at < ?{idx}"));
            params.push(format_datetime(before).into());
            idx += 1;
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT COUNT(*) FROM sync_executions {where_clause}"),
                libsql::params_from_iter(params.clone()),
            )
            .await?;
        let total = match rows.next().await? {
            Some(row) => get_count(&row, 0)?,
            None => 0,
        };

        let page = filter.page.max(1);
        let page_size = if filter.page_size == 0 { 20 } else { filter.page_size };
        params.push(i64::from(page_size).into());
        params.push((i64::from(page - 1) * i64::from(page_size)).into());
        let sql = format!(
            "SELECT {SELECT_COLS} FROM sync_executions {where_clause}
             ORDER BY started_at DESC, rowid DESC LIMIT ?{idx} OFFSET ?{}",
            idx + 1
        );
        let mut rows = self
            .db()
            .conn()
            .query(&sql, libsql::params_from_iter(params))
            .await?;
        let mut executions = Vec::new();
        while let Some(row) = rows.next().await? {
            executions.push(row_to_execution(&row)?);
        }

        Ok(ExecutionPage {
            executions,
            total,
            page,
            page_size,
        })
    }

    /// Aggregate run statistics for one task.
    ///
    /// `success_rate` is successful over finished executions, as a percentage.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if a query fails.
    pub async fn task_statistics(&self, task_id: &str) -> Result<TaskStatistics, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                "SELECT
                    COUNT(*),
                    SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END),
                    AVG(duration_ms),
                    SUM(processed_records)
                 FROM sync_executions WHERE task_id = ?1",
                [task_id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let total_executions = get_count(&row, 0)?;
        let successful_executions = get_count(&row, 1)?;
        let failed_executions = get_count(&row, 2)?;
        let cancelled_executions = get_count(&row, 3)?;
        let average_duration_ms = row.get::<Option<f64>>(4)?.unwrap_or(0.0);
        let total_processed_records = get_count(&row, 5)?;

        let finished = successful_executions + failed_executions + cancelled_executions;
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if finished == 0 {
            0.0
        } else {
            successful_executions as f64 / finished as f64 * 100.0
        };

        let recent = self
            .list_executions(&ExecutionFilter {
                task_id: Some(task_id.to_string()),
                page: 1,
                page_size: RECENT_EXECUTIONS,
                ..Default::default()
            })
            .await?;

        Ok(TaskStatistics {
            task_id: task_id.to_string(),
            total_executions,
            successful_executions,
            failed_executions,
            cancelled_executions,
            average_duration_ms,
            total_processed_records,
            success_rate,
            recent_executions: recent.executions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::helpers::{seed_task, test_service};
    use pretty_assertions::assert_eq;

    fn counts(processed: u64) -> ExecutionCounts {
        ExecutionCounts {
            source_records: processed,
            processed_records: processed,
            inserted_records: processed,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn finalize_sets_terminal_state_once() {
        let svc = test_service().await;
        let task = seed_task(&svc, "nightly").await;
        let exe = svc
            .create_execution(&task.id, ExecutionType::Manual)
            .await
            .unwrap();
        assert_eq!(exe.status, ExecutionStatus::Running);

        let summary = serde_json::json!({"governance": {"overall_quality_score": 100.0}});
        let done = svc
            .finalize_execution(&exe.id, ExecutionStatus::Success, counts(5), Some(&summary), None)
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Success);
        assert_eq!(done.counts.processed_records, 5);
        assert!(done.finished_at.is_some());
        assert!(done.duration_ms.is_some());
        assert_eq!(done.result, Some(summary));

        let err = svc
            .finalize_execution(&exe.id, ExecutionStatus::Failed, counts(0), None, Some("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidState(_)));
        let stored = svc.get_execution(&exe.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn finalize_rejects_non_terminal_status() {
        let svc = test_service().await;
        let task = seed_task(&svc, "nightly").await;
        let exe = svc
            .create_execution(&task.id, ExecutionType::Manual)
            .await
            .unwrap();
        let err = svc
            .finalize_execution(&exe.id, ExecutionStatus::Pending, counts(0), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidState(_)));
    }

    #[tokio::test]
    async fn statistics_aggregate_finished_runs() {
        let svc = test_service().await;
        let task = seed_task(&svc, "nightly").await;
        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            let exe = svc
                .create_execution(&task.id, ExecutionType::Scheduled)
                .await
                .unwrap();
            svc.finalize_execution(&exe.id, status, counts(10), None, None)
                .await
                .unwrap();
        }

        let stats = svc.task_statistics(&task.id).await.unwrap();
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.successful_executions, 2);
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.cancelled_executions, 1);
        assert_eq!(stats.total_processed_records, 40);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.recent_executions.len(), 4);
    }

    #[tokio::test]
    async fn statistics_for_task_without_runs() {
        let svc = test_service().await;
        let task = seed_task(&svc, "nightly").await;
        let stats = svc.task_statistics(&task.id).await.unwrap();
        assert_eq!(stats.total_executions, 0);
        assert!(stats.success_rate.abs() < f64::EPSILON);
        assert!(stats.recent_executions.is_empty());
    }

    #[tokio::test]
    async fn list_executions_filters_and_pages() {
        let svc = test_service().await;
        let task = seed_task(&svc, "nightly").await;
        for _ in 0..3 {
            let exe = svc
                .create_execution(&task.id, ExecutionType::Manual)
                .await
                .unwrap();
            svc.finalize_execution(&exe.id, ExecutionStatus::Success, counts(1), None, None)
                .await
                .unwrap();
        }
        let failed = svc
            .create_execution(&task.id, ExecutionType::Retry)
            .await
            .unwrap();
        svc.finalize_execution(&failed.id, ExecutionStatus::Failed, counts(0), None, Some("x"))
            .await
            .unwrap();

        let page = svc
            .list_executions(&ExecutionFilter {
                task_id: Some(task.id.clone()),
                status: Some(ExecutionStatus::Success),
                page: 1,
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.executions.len(), 2);

        let second = svc
            .list_executions(&ExecutionFilter {
                task_id: Some(task.id.clone()),
                status: Some(ExecutionStatus::Success),
                page: 2,
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.executions.len(), 1);

        let retries = svc
            .list_executions(&ExecutionFilter {
                execution_type: Some(ExecutionType::Retry),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(retries.total, 1);
        assert_eq!(retries.executions[0].id, failed.id);

        let latest = svc.latest_execution(&task.id).await.unwrap().unwrap();
        assert_eq!(latest.id, failed.id);
    }
}
