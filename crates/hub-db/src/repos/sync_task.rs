//! Sync task repository: CRUD, status transitions, run bookkeeping.

use chrono::{DateTime, Utc};

use hub_core::entities::{NewSyncTask, SyncTask};
use hub_core::enums::{ExecutionStatus, SyncTaskStatus};
use hub_core::ids::PREFIX_SYNC_TASK;
use hub_core::rules::source::DataSourceConfig;

use crate::error::DatabaseError;
use crate::helpers::{
    format_datetime, format_optional_datetime, get_count, get_opt_string, now, parse_datetime,
    parse_enum, parse_json, parse_optional_datetime, to_json,
};
use crate::service::HubService;
use crate::updates::sync_task::SyncTaskUpdate;

const SELECT_COLS: &str = "id, name, description, library_id, interface_id, data_source, \
     key_matching, field_mapping, quality_rules, cleansing_rules, masking_rules, governance, \
     schedule, status, next_run_time, last_sync_time, last_sync_status, last_sync_message, \
     total_runs, successful_runs, failed_runs, created_by, created_at, updated_at";

/// Filter for [`HubService::list_sync_tasks`].
#[derive(Debug, Default)]
pub struct SyncTaskFilter {
    pub status: Option<SyncTaskStatus>,
    pub interface_id: Option<String>,
    pub limit: Option<u32>,
}

fn row_to_sync_task(row: &libsql::Row) -> Result<SyncTask, DatabaseError> {
    let last_sync_status = get_opt_string(row, 16)?
        .map(|s| parse_enum::<ExecutionStatus>(&s))
        .transpose()?;
    Ok(SyncTask {
        id: row.get(0)?,
        name: row.get(1)?,
        description: get_opt_string(row, 2)?,
        library_id: row.get(3)?,
        interface_id: row.get(4)?,
        data_source: parse_json(&row.get::<String>(5)?)?,
        key_matching: parse_json(&row.get::<String>(6)?)?,
        field_mapping: parse_json(&row.get::<String>(7)?)?,
        quality_rules: parse_json(&row.get::<String>(8)?)?,
        cleansing_rules: parse_json(&row.get::<String>(9)?)?,
        masking_rules: parse_json(&row.get::<String>(10)?)?,
        governance: parse_json(&row.get::<String>(11)?)?,
        schedule: parse_json(&row.get::<String>(12)?)?,
        status: parse_enum(&row.get::<String>(13)?)?,
        next_run_time: parse_optional_datetime(get_opt_string(row, 14)?.as_deref())?,
        last_sync_time: parse_optional_datetime(get_opt_string(row, 15)?.as_deref())?,
        last_sync_status,
        last_sync_message: get_opt_string(row, 17)?,
        total_runs: get_count(row, 18)?,
        successful_runs: get_count(row, 19)?,
        failed_runs: get_count(row, 20)?,
        created_by: get_opt_string(row, 21)?,
        created_at: parse_datetime(&row.get::<String>(22)?)?,
        updated_at: parse_datetime(&row.get::<String>(23)?)?,
    })
}

impl HubService {
    /// Insert a task in `draft`.
    ///
    /// Rule documents are stored as given; validating them is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if the target interface does not
    /// exist and `DatabaseError::Conflict` if the name is taken.
    pub async fn create_sync_task(
        &self,
        input: &NewSyncTask,
        next_run_time: Option<DateTime<Utc>>,
    ) -> Result<SyncTask, DatabaseError> {
        let interface = self.get_interface(&input.interface_id).await?;
        if interface.library_id != input.library_id {
            return Err(DatabaseError::InvalidState(format!(
                "interface {} does not belong to library {}",
                interface.id, input.library_id
            )));
        }

        let now = now();
        let id = self.db().generate_id(PREFIX_SYNC_TASK).await?;
        self.db()
            .execute(
                "INSERT INTO sync_tasks (id, name, description, library_id, interface_id,
                    data_source, key_matching, field_mapping, quality_rules, cleansing_rules,
                    masking_rules, governance, schedule, status, next_run_time, created_by,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                libsql::params![
                    id.as_str(),
                    input.name.as_str(),
                    input.description.as_deref(),
                    input.library_id.as_str(),
                    input.interface_id.as_str(),
                    to_json(&input.data_source)?,
                    to_json(&input.key_matching)?,
                    to_json(&input.field_mapping)?,
                    to_json(&input.quality_rules)?,
                    to_json(&input.cleansing_rules)?,
                    to_json(&input.masking_rules)?,
                    to_json(&input.governance)?,
                    to_json(&input.schedule)?,
                    SyncTaskStatus::Draft.as_str(),
                    format_optional_datetime(next_run_time.as_ref()),
                    input.created_by.as_deref(),
                    format_datetime(&now),
                    format_datetime(&now)
                ],
            )
            .await
            .map_err(|e| match e {
                DatabaseError::LibSql(e) => DatabaseError::unique_or(e, || {
                    format!("sync task '{}' already exists", input.name)
                }),
                other => other,
            })?;

        tracing::debug!(task_id = %id, name = %input.name, "sync task created");
        self.get_sync_task(&id).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no task has this id.
    pub async fn get_sync_task(&self, id: &str) -> Result<SyncTask, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM sync_tasks WHERE id = ?1"),
                [id],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::not_found("sync task", id))?;
        row_to_sync_task(&row)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no task has this name.
    pub async fn get_sync_task_by_name(&self, name: &str) -> Result<SyncTask, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM sync_tasks WHERE name = ?1"),
                [name],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::not_found("sync task", name))?;
        row_to_sync_task(&row)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_sync_tasks(
        &self,
        filter: &SyncTaskFilter,
    ) -> Result<Vec<SyncTask>, DatabaseError> {
        let mut conditions = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        let mut idx = 1usize;

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{idx}"));
            params.push(status.as_str().into());
            idx += 1;
        }
        if let Some(ref interface_id) = filter.interface_id {
            conditions.push(format!("interface_id = ?{idx}"));
            params.push(interface_id.clone().into());
            idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        params.push(i64::from(filter.limit.unwrap_or(u32::MAX >> 1)).into());
        let sql = format!(
            "SELECT {SELECT_COLS} FROM sync_tasks {where_clause} ORDER BY created_at DESC, id LIMIT ?{idx}"
        );

        let mut rows = self
            .db()
            .conn()
            .query(&sql, libsql::params_from_iter(params))
            .await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            tasks.push(row_to_sync_task(&row)?);
        }
        Ok(tasks)
    }

    /// Tasks in a schedulable status, in next-run order. Tasks without a
    /// next run come last.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_schedulable_tasks(&self) -> Result<Vec<SyncTask>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM sync_tasks
                     WHERE status IN ('active', 'failed')
                     ORDER BY next_run_time IS NULL, next_run_time, id"
                ),
                (),
            )
            .await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            tasks.push(row_to_sync_task(&row)?);
        }
        Ok(tasks)
    }

    /// Schedulable tasks whose `next_run_time` is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<SyncTask>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM sync_tasks
                     WHERE status IN ('active', 'failed')
                       AND next_run_time IS NOT NULL AND next_run_time <= ?1
                     ORDER BY next_run_time, id"
                ),
                [format_datetime(&now)],
            )
            .await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            tasks.push(row_to_sync_task(&row)?);
        }
        Ok(tasks)
    }

    /// Apply a partial update. Returns the stored task.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no task has this id and
    /// `DatabaseError::Conflict` if a rename collides.
    pub async fn update_sync_task(
        &self,
        id: &str,
        update: &SyncTaskUpdate,
    ) -> Result<SyncTask, DatabaseError> {
        let mut sets = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        let mut idx = 1usize;

        macro_rules! set_json {
            ($field:ident) => {
                if let Some(ref value) = update.$field {
                    sets.push(format!(concat!(stringify!($field), " = ?{}"), idx));
                    params.push(to_json(value)?.into());
                    idx += 1;
                }
            };
        }

        if let Some(ref name) = update.name {
            sets.push(format!("name = ?{idx}"));
            params.push(name.clone().into());
            idx += 1;
        }
        if let Some(ref description) = update.description {
            sets.push(format!("description = ?{idx}"));
            params.push(description.clone().map_or(libsql::Value::Null, Into::into));
            idx += 1;
        }
        set_json!(data_source);
        set_json!(key_matching);
        set_json!(field_mapping);
        set_json!(quality_rules);
        set_json!(cleansing_rules);
        set_json!(masking_rules);
        set_json!(governance);
        set_json!(schedule);
        if let Some(ref next_run_time) = update.next_run_time {
            sets.push(format!("next_run_time = ?{idx}"));
            params.push(
                format_optional_datetime(next_run_time.as_ref())
                    .map_or(libsql::Value::Null, Into::into),
            );
            idx += 1;
        }

        if sets.is_empty() {
            return self.get_sync_task(id).await;
        }

        sets.push(format!("updated_at = ?{idx}"));
        params.push(format_datetime(&now()).into());
        idx += 1;
        params.push(id.into());

        let sql = format!("UPDATE sync_tasks SET {} WHERE id = ?{idx}", sets.join(", "));
        let changed = self
            .db()
            .execute(&sql, libsql::params_from_iter(params))
            .await
            .map_err(|e| match e {
                DatabaseError::LibSql(e) => {
                    DatabaseError::unique_or(e, || "sync task name already exists".to_string())
                }
                other => other,
            })?;
        if changed == 0 {
            return Err(DatabaseError::not_found("sync task", id));
        }
        self.get_sync_task(id).await
    }

    /// Move a task to `to` if its state machine allows it.
    ///
    /// The UPDATE is guarded on the status that was read, so two racing
    /// transitions cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` for a disallowed or lost transition.
    pub async fn transition_sync_task(
        &self,
        id: &str,
        to: SyncTaskStatus,
    ) -> Result<SyncTask, DatabaseError> {
        let current = self.get_sync_task(id).await?;
        if !current.status.can_transition_to(to) {
            return Err(DatabaseError::InvalidState(format!(
                "sync task {id} cannot move from {} to {to}",
                current.status
            )));
        }

        let changed = self
            .db()
            .execute(
                "UPDATE sync_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                libsql::params![
                    to.as_str(),
                    format_datetime(&now()),
                    id,
                    current.status.as_str()
                ],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::InvalidState(format!(
                "sync task {id} changed status concurrently"
            )));
        }
        tracing::debug!(task_id = %id, from = %current.status, to = %to, "sync task transitioned");
        self.get_sync_task(id).await
    }

    /// Record the outcome of one run and move the task out of `running`.
    ///
    /// A task stopped while the run was in flight accepts a run that lands in
    /// `stopped`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the task is not running or
    /// `next_status` is not reachable from `running`.
    pub async fn record_task_run(
        &self,
        id: &str,
        next_status: SyncTaskStatus,
        outcome: ExecutionStatus,
        message: Option<&str>,
    ) -> Result<SyncTask, DatabaseError> {
        if !SyncTaskStatus::Running.can_transition_to(next_status) {
            return Err(DatabaseError::InvalidState(format!(
                "a finished run cannot leave sync task {id} in {next_status}"
            )));
        }
        let now = format_datetime(&now());
        let changed = self
            .db()
            .execute(
                "UPDATE sync_tasks SET
                    status = ?1,
                    last_sync_status = ?2,
                    last_sync_message = ?3,
                    last_sync_time = ?4,
                    total_runs = total_runs + 1,
                    successful_runs = successful_runs + ?5,
                    failed_runs = failed_runs + ?6,
                    updated_at = ?4
                 WHERE id = ?7 AND (status = 'running' OR (status = 'stopped' AND ?1 = 'stopped'))",
                libsql::params![
                    next_status.as_str(),
                    outcome.as_str(),
                    message,
                    now,
                    i64::from(outcome == ExecutionStatus::Success),
                    i64::from(outcome == ExecutionStatus::Failed),
                    id
                ],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::InvalidState(format!(
                "sync task {id} is not running"
            )));
        }
        self.get_sync_task(id).await
    }

    /// Persist the scheduler's view of the task's timing.
    ///
    /// `last_sync_time` is left as is when `None`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no task has this id.
    pub async fn set_schedule_times(
        &self,
        id: &str,
        next_run_time: Option<DateTime<Utc>>,
        last_sync_time: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .db()
            .execute(
                "UPDATE sync_tasks
                 SET next_run_time = ?1, last_sync_time = COALESCE(?2, last_sync_time), updated_at = ?3
                 WHERE id = ?4",
                libsql::params![
                    format_optional_datetime(next_run_time.as_ref()),
                    format_optional_datetime(last_sync_time.as_ref()),
                    format_datetime(&now()),
                    id
                ],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::not_found("sync task", id));
        }
        Ok(())
    }

    /// Replace the data-source document, used to persist advanced watermarks.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no task has this id.
    pub async fn update_data_source(
        &self,
        id: &str,
        data_source: &DataSourceConfig,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .db()
            .execute(
                "UPDATE sync_tasks SET data_source = ?1, updated_at = ?2 WHERE id = ?3",
                libsql::params![to_json(data_source)?, format_datetime(&now()), id],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::not_found("sync task", id));
        }
        Ok(())
    }

    /// Delete a task with its executions and lineage in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no task has this id and
    /// `DatabaseError::Conflict` while it is running.
    pub async fn delete_sync_task(&self, id: &str) -> Result<(), DatabaseError> {
        let tx = self.db().begin().await?;
        let result = async {
            let mut rows = tx
                .query("SELECT status FROM sync_tasks WHERE id = ?1", [id])
                .await?;
            let row = rows
                .next()
                .await?
                .ok_or_else(|| DatabaseError::not_found("sync task", id))?;
            let status: SyncTaskStatus = parse_enum(&row.get::<String>(0)?)?;
            if status == SyncTaskStatus::Running {
                return Err(DatabaseError::Conflict(format!(
                    "sync task {id} is running and cannot be deleted"
                )));
            }
            tx.execute("DELETE FROM data_lineage WHERE task_id = ?1", [id])
                .await?;
            tx.execute("DELETE FROM sync_executions WHERE task_id = ?1", [id])
                .await?;
            tx.execute("DELETE FROM sync_tasks WHERE id = ?1", [id])
                .await?;
            Ok(())
        }
        .await;
        tx.finish(result).await
    }
}
