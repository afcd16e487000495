//! The scheduler: trigger registration, the interval tick and lock-protected
//! scheduled execution.
//!
//! Cron and one-shot triggers each own a timer task. Interval triggers are
//! polled on the tick, which also picks up newly schedulable tasks and drops
//! timers of tasks that are no longer schedulable. Every timer hangs off one
//! generation token, itself a child of the shutdown token: a reload cancels
//! the generation, `stop` cancels everything. Runs themselves are not tied
//! to either token, so neither a reload nor a stop aborts one mid-flight.
//!
//! A failed run with retries left is rescheduled `retry_interval_seconds`
//! out instead of at its next regular fire time, and runs as a retry. Once
//! `max_retries` consecutive retries have failed the task falls back to its
//! regular schedule.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use hub_config::{SchedulerConfig, SyncConfig};
use hub_core::entities::SyncTask;
use hub_core::enums::{ExecutionStatus, ExecutionType};
use hub_core::errors::CoreError;
use hub_db::repos::execution::ExecutionFilter;
use hub_db::service::HubService;
use hub_engine::orchestrator::{Orchestrator, SyncOptions};

use crate::lock::{DistributedLock, LockGuard};
use crate::trigger::{Trigger, TriggerKind};

/// Slack allowed between a timer waking and the stored next run time.
const DUE_SLACK_SECONDS: i64 = 1;

/// Why a scheduled attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another instance owns the run.
    LockHeld,
    /// The task's status does not allow a start.
    NotStartable,
    /// The stored next run time is not due yet.
    NotDue,
}

/// What one scheduled attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduledRun {
    Completed {
        execution_id: String,
        status: ExecutionStatus,
    },
    Failed {
        error: String,
    },
    Skipped {
        reason: SkipReason,
    },
}

struct Registration {
    trigger: &'static str,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<CancellationToken>,
    generation: Option<CancellationToken>,
    ticker: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    svc: Arc<HubService>,
    orchestrator: Arc<Orchestrator>,
    lock: Arc<dyn DistributedLock>,
    config: SchedulerConfig,
    sync: SyncConfig,
    lifecycle: Mutex<Lifecycle>,
    registrations: Mutex<HashMap<String, Registration>>,
    in_flight: Mutex<JoinSet<()>>,
    /// Tasks whose stored next run time is a retry.
    retries: Mutex<HashSet<String>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        lock: Arc<dyn DistributedLock>,
        config: SchedulerConfig,
        sync: SyncConfig,
    ) -> Self {
        Self {
            svc: Arc::clone(orchestrator.service()),
            orchestrator,
            lock,
            config,
            sync,
            lifecycle: Mutex::new(Lifecycle::default()),
            registrations: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(JoinSet::new()),
            retries: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle().shutdown.is_some()
    }

    /// Registered task ids with their trigger kind, sorted by id.
    #[must_use]
    pub fn registered(&self) -> Vec<(String, &'static str)> {
        let mut out: Vec<_> = self
            .registrations()
            .iter()
            .map(|(id, r)| (id.clone(), r.trigger))
            .collect();
        out.sort();
        out
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retries(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registrations(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register every schedulable task and start the tick. Returns the
    /// number of registered tasks.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Conflict` if already running, or the store's error.
    pub async fn start(self: &Arc<Self>) -> Result<usize, CoreError> {
        if !self.config.enabled {
            info!("scheduler disabled by configuration");
            return Ok(0);
        }
        let shutdown = {
            let mut state = self.lifecycle();
            if state.shutdown.is_some() {
                return Err(CoreError::Conflict("scheduler is already running".into()));
            }
            let shutdown = CancellationToken::new();
            state.shutdown = Some(shutdown.clone());
            shutdown
        };

        let registered = match self.reload().await {
            Ok(n) => n,
            Err(e) => {
                self.stop().await;
                return Err(e);
            }
        };

        let tick = Duration::from_secs(self.config.tick_seconds.max(1));
        let this = Arc::clone(self);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = this.tick().await {
                            error!(error = %e, "scheduler tick failed");
                        }
                    }
                }
            }
            debug!("scheduler tick stopped");
        });
        self.lifecycle().ticker = Some(ticker);

        info!(
            instance = self.lock.owner(),
            registered,
            tick_seconds = tick.as_secs(),
            "scheduler started"
        );
        Ok(registered)
    }

    /// Cancel every trigger, then wait for the tick, the timers and any
    /// in-flight runs to finish.
    pub async fn stop(&self) {
        let (shutdown, ticker) = {
            let mut state = self.lifecycle();
            state.generation = None;
            (state.shutdown.take(), state.ticker.take())
        };
        let Some(shutdown) = shutdown else {
            warn!("scheduler stop requested but it is not running");
            return;
        };
        shutdown.cancel();

        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                error!(error = %e, "scheduler tick ended abnormally");
            }
        }
        let timers: Vec<JoinHandle<()>> = self
            .registrations()
            .drain()
            .filter_map(|(_, r)| r.timer)
            .collect();
        for timer in timers {
            if let Err(e) = timer.await {
                error!(error = %e, "trigger timer ended abnormally");
            }
        }
        self.wait_idle().await;
        info!("scheduler stopped");
    }

    /// Recreate every trigger from the store. In-flight runs continue.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the scheduler is not running, or
    /// the store's error.
    #[instrument(skip(self))]
    pub async fn reload(self: &Arc<Self>) -> Result<usize, CoreError> {
        let generation = {
            let mut state = self.lifecycle();
            let Some(shutdown) = state.shutdown.clone() else {
                return Err(CoreError::Validation("scheduler is not running".into()));
            };
            if let Some(old) = state.generation.take() {
                old.cancel();
            }
            let generation = shutdown.child_token();
            state.generation = Some(generation.clone());
            generation
        };
        self.registrations().clear();

        let tasks = self.svc.list_schedulable_tasks().await?;
        let now = Utc::now();
        let mut registered = 0;
        for task in &tasks {
            match self.register_with(task, &generation, now) {
                Ok(Some(_)) => registered += 1,
                Ok(None) => {}
                Err(e) => warn!(task_id = %task.id, error = %e, "unusable schedule; task not registered"),
            }
        }
        info!(registered, candidates = tasks.len(), "scheduled tasks loaded");
        Ok(registered)
    }

    /// Wait for every dispatched run to finish.
    pub async fn wait_idle(&self) {
        let mut runs = std::mem::take(
            &mut *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(joined) = runs.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "scheduled run ended abnormally");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register, or re-register, a task under its current schedule.
    /// Returns the trigger kind, or `None` when the task is not scheduled.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the scheduler is not running or
    /// the cron expression is bad.
    pub fn register(self: &Arc<Self>, task: &SyncTask) -> Result<Option<&'static str>, CoreError> {
        let Some(generation) = self.lifecycle().generation.clone() else {
            return Err(CoreError::Validation("scheduler is not running".into()));
        };
        self.register_with(task, &generation, Utc::now())
    }

    /// Returns whether the task was registered.
    pub fn unregister(&self, task_id: &str) -> bool {
        let Some(registration) = self.registrations().remove(task_id) else {
            return false;
        };
        if let Some(timer) = registration.timer {
            timer.abort();
        }
        debug!(task_id, trigger = registration.trigger, "trigger unregistered");
        true
    }

    fn register_with(
        self: &Arc<Self>,
        task: &SyncTask,
        generation: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<Option<&'static str>, CoreError> {
        let trigger = Trigger::for_task(task)?;
        self.unregister(&task.id);
        if !task.status.is_schedulable() || matches!(trigger.kind, TriggerKind::Manual) {
            return Ok(None);
        }

        let kind = trigger.kind();
        let timer = if trigger.is_timed() {
            // A fire time missed while nobody was running is caught up once.
            if task.next_run_time.is_some_and(|at| at <= now) {
                debug!(task_id = %task.id, "overdue trigger; catching up");
                self.dispatch(task.id.clone());
            }
            let this = Arc::clone(self);
            let token = generation.child_token();
            Some(tokio::spawn(this.run_timer(task.id.clone(), trigger, token)))
        } else {
            None
        };
        self.registrations().insert(
            task.id.clone(),
            Registration {
                trigger: kind,
                timer,
            },
        );
        debug!(task_id = %task.id, trigger = kind, "trigger registered");
        Ok(Some(kind))
    }

    async fn run_timer(self: Arc<Self>, task_id: String, trigger: Trigger, token: CancellationToken) {
        let mut after = Utc::now();
        while let Some(at) = trigger.next_fire(after) {
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(wait) => {}
            }
            debug!(task_id = %task_id, trigger = trigger.kind(), fire_time = %at, "trigger fired");
            self.dispatch(task_id.clone());
            after = at;
        }
        debug!(task_id = %task_id, "trigger has no further fire times");
    }

    fn dispatch(self: &Arc<Self>, task_id: String) {
        let this = Arc::clone(self);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            match this.execute_scheduled_task(&task_id).await {
                Ok(run) => debug!(task_id = %task_id, ?run, "scheduled attempt finished"),
                Err(e) => error!(task_id = %task_id, error = %e, "scheduled attempt failed"),
            }
        });
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// One pass over the store: dispatch due interval tasks and retries, register
    /// timers for new timed tasks, drop timers of unschedulable ones.
    /// Returns the number of dispatched runs.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    #[instrument(level = "debug", skip(self))]
    pub async fn tick(self: &Arc<Self>) -> Result<usize, CoreError> {
        let now = Utc::now();
        let tasks = self.svc.list_schedulable_tasks().await?;
        let generation = self.lifecycle().generation.clone();

        let live: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let stale: Vec<String> = self
            .registrations()
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.unregister(&id);
        }

        let mut dispatched = 0;
        for task in &tasks {
            let trigger = match Trigger::for_task(task) {
                Ok(trigger) => trigger,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "unusable schedule; skipping");
                    continue;
                }
            };
            match trigger.kind {
                TriggerKind::Interval(_) => {
                    if task.next_run_time.is_some_and(|at| at <= now) {
                        self.dispatch(task.id.clone());
                        dispatched += 1;
                    }
                }
                TriggerKind::Once(_) | TriggerKind::Cron(_) => {
                    let retry_due = task.next_run_time.is_some_and(|at| at <= now)
                        && self.retries().contains(&task.id);
                    if retry_due {
                        self.dispatch(task.id.clone());
                        dispatched += 1;
                    }
                    let known = self.registrations().contains_key(&task.id);
                    if let (false, Some(generation)) = (known, &generation) {
                        self.register_with(task, generation, now)?;
                    }
                }
                TriggerKind::Manual => {}
            }
        }
        if dispatched > 0 {
            debug!(dispatched, "due tasks dispatched");
        }
        Ok(dispatched)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run a task on behalf of the schedule.
    ///
    /// Contention for the task's lock is a skip, not an error. Once the lock
    /// is held the next run time is always recomputed, whatever the run's
    /// outcome, and the lock is always released.
    ///
    /// # Errors
    ///
    /// Returns store or lock backend errors. Run failures are reported as
    /// [`ScheduledRun::Failed`]; they live on in the execution record.
    #[instrument(skip(self), fields(instance = self.lock.owner()))]
    pub async fn execute_scheduled_task(&self, task_id: &str) -> Result<ScheduledRun, CoreError> {
        let key = self.config.lock_key(task_id);
        let ttl = Duration::from_secs(self.config.lock_ttl_seconds);
        let guard = match LockGuard::acquire(Arc::clone(&self.lock), key, ttl).await {
            Ok(guard) => guard,
            Err(e) if e.is_skip() => {
                warn!(task_id, "lock held by another instance; skipping run");
                return Ok(ScheduledRun::Skipped {
                    reason: SkipReason::LockHeld,
                });
            }
            Err(e) => return Err(e),
        };
        let outcome = self.run_locked(task_id).await;
        guard.release().await;
        outcome
    }

    async fn run_locked(&self, task_id: &str) -> Result<ScheduledRun, CoreError> {
        let task = self.svc.get_sync_task(task_id).await?;
        if !task.status.can_start() {
            warn!(task_id, status = %task.status, "task cannot start; skipping run");
            return Ok(ScheduledRun::Skipped {
                reason: SkipReason::NotStartable,
            });
        }
        if !task
            .next_run_time
            .is_some_and(|at| at <= Utc::now() + chrono::Duration::seconds(DUE_SLACK_SECONDS))
        {
            debug!(task_id, next_run_time = ?task.next_run_time, "task not due; skipping run");
            return Ok(ScheduledRun::Skipped {
                reason: SkipReason::NotDue,
            });
        }

        let kind = if self.retries().remove(task_id) {
            ExecutionType::Retry
        } else {
            ExecutionType::Scheduled
        };
        let options = SyncOptions::from_config(&self.sync, kind);
        let result = self.orchestrator.run(task_id, &options, None).await;
        let failed = match &result {
            Ok(report) => report.status == ExecutionStatus::Failed,
            Err(CoreError::Cancelled { .. }) => false,
            Err(_) => true,
        };
        let next = self.reschedule(task_id, failed).await?;

        Ok(match result {
            Ok(report) => {
                info!(task_id, execution_id = %report.execution_id, next_run_time = ?next, "scheduled run finished");
                ScheduledRun::Completed {
                    execution_id: report.execution_id,
                    status: report.status,
                }
            }
            Err(CoreError::Cancelled { execution_id }) => ScheduledRun::Completed {
                execution_id,
                status: ExecutionStatus::Cancelled,
            },
            Err(e) => {
                error!(task_id, error = %e, next_run_time = ?next, "scheduled run failed");
                ScheduledRun::Failed {
                    error: e.to_string(),
                }
            }
        })
    }

    /// Store the next run time and stamp the last sync time.
    async fn reschedule(&self, task_id: &str, failed: bool) -> Result<Option<DateTime<Utc>>, CoreError> {
        let task = self.svc.get_sync_task(task_id).await?;
        let now = Utc::now();
        let next = if !task.status.is_schedulable() {
            None
        } else if failed && self.retry_left(&task).await? {
            let wait = i64::try_from(task.schedule.retry_interval_seconds).map_err(|_| {
                CoreError::Validation("schedule.retry_interval_seconds is too large".into())
            })?;
            self.retries().insert(task.id.clone());
            Some(now + chrono::Duration::seconds(wait))
        } else {
            task.schedule.next_run_after(now, true)?
        };
        self.svc.set_schedule_times(task_id, next, Some(now)).await?;
        Ok(next)
    }

    /// Whether the failure streak that just grew is still within
    /// `max_retries` retries.
    async fn retry_left(&self, task: &SyncTask) -> Result<bool, CoreError> {
        let max = task.schedule.max_retries;
        if max == 0 {
            return Ok(false);
        }
        let recent = self
            .svc
            .list_executions(&ExecutionFilter {
                task_id: Some(task.id.clone()),
                page: 1,
                page_size: max.saturating_add(1),
                ..ExecutionFilter::default()
            })
            .await?;
        let streak = recent
            .executions
            .iter()
            .take_while(|e| e.status == ExecutionStatus::Failed)
            .count();
        if streak <= usize::try_from(max).unwrap_or(usize::MAX) {
            info!(task_id = %task.id, attempt = streak, max_retries = max, "run failed; retry scheduled");
            Ok(true)
        } else {
            warn!(task_id = %task.id, max_retries = max, "retries exhausted; back on the regular schedule");
            Ok(false)
        }
    }
}
