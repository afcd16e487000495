//! Task service: the entry points the CLI and any API layer call.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use hub_config::SyncConfig;
use hub_core::entities::{
    LineageRecord, NewSyncTask, SyncExecution, SyncTask, TaskStatistics, TaskStatusReport,
};
use hub_core::enums::{ExecutionType, SyncTaskStatus};
use hub_core::errors::CoreError;
use hub_core::rules::Validate;
use hub_db::repos::execution::{ExecutionFilter, ExecutionPage};
use hub_db::repos::sync_task::SyncTaskFilter;
use hub_db::service::HubService;
use hub_db::updates::sync_task::SyncTaskUpdate;

use crate::orchestrator::{Orchestrator, SyncOptions, SyncProgress, SyncReport};

/// What [`TaskService::stop_task`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// An idle task was moved to `stopped`.
    Stopped,
    /// The in-flight run was signalled; it lands in `stopped` when it notices.
    Cancelling,
    /// No run is alive in this process. The stop is written to the store,
    /// where a run in another process notices it at its next checkpoint.
    Requested,
}

pub struct TaskService {
    svc: Arc<HubService>,
    orchestrator: Arc<Orchestrator>,
    defaults: SyncConfig,
}

impl TaskService {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, defaults: SyncConfig) -> Self {
        Self {
            svc: Arc::clone(orchestrator.service()),
            orchestrator,
            defaults,
        }
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Default options for a run of the given type.
    #[must_use]
    pub fn options(&self, execution_type: ExecutionType) -> SyncOptions {
        SyncOptions::from_config(&self.defaults, execution_type)
    }

    /// # Errors
    ///
    /// Returns `CoreError::Validation` listing every bad rule document,
    /// `CoreError::Conflict` for a taken name and `CoreError::NotFound`
    /// for a missing target interface.
    pub async fn create_task(&self, input: &NewSyncTask) -> Result<SyncTask, CoreError> {
        input.validate("task")?;
        let next = input.schedule.next_run_after(Utc::now(), false)?;
        let task = self.svc.create_sync_task(input, next).await?;
        info!(task_id = %task.id, name = %task.name, trigger = task.schedule.trigger.kind(), "sync task created");
        Ok(task)
    }

    /// Look a task up by id, falling back to its name.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if neither matches.
    pub async fn get_task(&self, id_or_name: &str) -> Result<SyncTask, CoreError> {
        match self.svc.get_sync_task(id_or_name).await {
            Ok(task) => Ok(task),
            Err(hub_db::error::DatabaseError::NotFound { .. }) => {
                Ok(self.svc.get_sync_task_by_name(id_or_name).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    ///
    /// Returns `CoreError::Other` if the query fails.
    pub async fn list_tasks(&self, filter: &SyncTaskFilter) -> Result<Vec<SyncTask>, CoreError> {
        Ok(self.svc.list_sync_tasks(filter).await?)
    }

    /// # Errors
    ///
    /// Returns `CoreError::Conflict` while the task runs and
    /// `CoreError::Validation` for a bad document.
    pub async fn update_task(
        &self,
        id: &str,
        update: SyncTaskUpdate,
    ) -> Result<SyncTask, CoreError> {
        let task = self.svc.get_sync_task(id).await?;
        if task.status == SyncTaskStatus::Running {
            return Err(CoreError::Conflict(format!(
                "sync task {id} is running and cannot be updated"
            )));
        }
        let mut errors = Vec::new();
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                errors.push("update.name: must not be empty".to_string());
            }
        }
        update.data_source.validate_into("update.data_source", &mut errors);
        update.key_matching.validate_into("update.key_matching", &mut errors);
        update.field_mapping.validate_into("update.field_mapping", &mut errors);
        update.quality_rules.validate_into("update.quality_rules", &mut errors);
        update.cleansing_rules.validate_into("update.cleansing_rules", &mut errors);
        update.masking_rules.validate_into("update.masking_rules", &mut errors);
        update.governance.validate_into("update.governance", &mut errors);
        update.schedule.validate_into("update.schedule", &mut errors);
        if !errors.is_empty() {
            return Err(CoreError::Validation(errors.join("; ")));
        }

        let mut update = update;
        if let Some(schedule) = &update.schedule {
            let next = schedule.next_run_after(Utc::now(), task.last_sync_time.is_some())?;
            update.next_run_time = Some(next);
        }
        Ok(self.svc.update_sync_task(id, &update).await?)
    }

    /// Make a task schedulable with a fresh next run.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` from a state that cannot activate.
    pub async fn activate_task(&self, id: &str) -> Result<SyncTask, CoreError> {
        let task = self.svc.get_sync_task(id).await?;
        if task.status == SyncTaskStatus::Active {
            return Ok(task);
        }
        let next = task.schedule.next_run_after(Utc::now(), false)?;
        self.svc.transition_sync_task(id, SyncTaskStatus::Active).await?;
        self.svc.set_schedule_times(id, next, None).await?;
        info!(task_id = id, next_run_time = ?next, "sync task activated");
        Ok(self.svc.get_sync_task(id).await?)
    }

    /// # Errors
    ///
    /// Returns `CoreError::Conflict` while the task runs.
    pub async fn delete_task(&self, id: &str) -> Result<(), CoreError> {
        if self.orchestrator.registry().is_running(id) {
            return Err(CoreError::Conflict(format!(
                "sync task {id} is running and cannot be deleted"
            )));
        }
        self.svc.delete_sync_task(id).await?;
        info!(task_id = id, "sync task deleted");
        Ok(())
    }

    /// Run a task now, outside its schedule.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run`].
    pub async fn execute_now(
        &self,
        id: &str,
        options: &SyncOptions,
        progress: Option<mpsc::Sender<SyncProgress>>,
    ) -> Result<SyncReport, CoreError> {
        self.orchestrator.run(id, options, progress).await
    }

    /// Stop a task. A running one is cancelled for real.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` unless the task is active or running.
    pub async fn stop_task(&self, id: &str) -> Result<StopOutcome, CoreError> {
        let task = self.svc.get_sync_task(id).await?;
        match task.status {
            SyncTaskStatus::Active => {
                self.svc.transition_sync_task(id, SyncTaskStatus::Stopped).await?;
                self.svc.set_schedule_times(id, None, None).await?;
                info!(task_id = id, "sync task stopped");
                Ok(StopOutcome::Stopped)
            }
            SyncTaskStatus::Running => {
                if self.orchestrator.registry().cancel(id) {
                    info!(task_id = id, "cancellation sent to in-flight run");
                    return Ok(StopOutcome::Cancelling);
                }
                warn!(task_id = id, "no live run here; stop recorded for the owning process");
                self.svc.transition_sync_task(id, SyncTaskStatus::Stopped).await?;
                self.svc.set_schedule_times(id, None, None).await?;
                Ok(StopOutcome::Requested)
            }
            other => Err(CoreError::Validation(format!(
                "sync task {id} is {other}; only active or running tasks can be stopped"
            ))),
        }
    }

    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown task.
    pub async fn task_status(&self, id: &str) -> Result<TaskStatusReport, CoreError> {
        let task = self.svc.get_sync_task(id).await?;
        let last_execution = self.svc.latest_execution(id).await?;
        let in_flight =
            self.orchestrator.registry().is_running(id) || task.status == SyncTaskStatus::Running;
        Ok(TaskStatusReport {
            task,
            last_execution,
            in_flight,
        })
    }

    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown task.
    pub async fn task_statistics(&self, id: &str) -> Result<TaskStatistics, CoreError> {
        self.svc.get_sync_task(id).await?;
        Ok(self.svc.task_statistics(id).await?)
    }

    /// # Errors
    ///
    /// Returns `CoreError::Other` if the query fails.
    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<ExecutionPage, CoreError> {
        Ok(self.svc.list_executions(filter).await?)
    }

    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown execution.
    pub async fn get_execution(&self, id: &str) -> Result<SyncExecution, CoreError> {
        Ok(self.svc.get_execution(id).await?)
    }

    /// Upstream: where a thematic record came from.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Other` if the query fails.
    pub async fn lineage_for_record(
        &self,
        interface_id: &str,
        record_id: &str,
    ) -> Result<Vec<LineageRecord>, CoreError> {
        Ok(self.svc.lineage_for_record(interface_id, record_id).await?)
    }

    /// Downstream: what a source record fed into.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Other` if the query fails.
    pub async fn impact_of_source(
        &self,
        library_id: &str,
        interface_id: &str,
        record_id: &str,
    ) -> Result<Vec<LineageRecord>, CoreError> {
        Ok(self
            .svc
            .impact_of_source(library_id, interface_id, record_id)
            .await?)
    }
}
