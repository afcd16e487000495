//! Task triggers and next-run computation.
//!
//! A schedule is one [`TriggerSpec`] plus an optional active window. Cron
//! expressions have second resolution (six or seven fields:
//! `sec min hour day-of-month month day-of-week [year]`) and are evaluated in UTC.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// How a task is triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Runs only on explicit request.
    Manual,
    /// Runs once at a fixed instant.
    Once { scheduled_time: DateTime<Utc> },
    /// Runs every `interval_seconds`, checked on the scheduler tick.
    Interval { interval_seconds: u64 },
    /// Runs on every fire time of a cron expression.
    Cron { cron_expression: String },
}

impl TriggerSpec {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Once { .. } => "once",
            Self::Interval { .. } => "interval",
            Self::Cron { .. } => "cron",
        }
    }
}

const fn default_enabled() -> bool {
    true
}

/// Scheduling document stored with each sync task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleConfig {
    #[serde(flatten)]
    pub trigger: TriggerSpec,

    /// Informational; evaluation is always UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default)]
    pub retry_interval_seconds: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::new(TriggerSpec::Manual)
    }
}

impl ScheduleConfig {
    #[must_use]
    pub const fn new(trigger: TriggerSpec) -> Self {
        Self {
            trigger,
            timezone: None,
            max_retries: 0,
            retry_interval_seconds: 0,
            enabled: true,
            start_date: None,
            end_date: None,
        }
    }

    /// Check trigger-specific fields.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` naming the offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        match &self.trigger {
            TriggerSpec::Interval { interval_seconds } if *interval_seconds == 0 => {
                return Err(CoreError::Validation(
                    "schedule.interval_seconds must be at least 1".into(),
                ));
            }
            TriggerSpec::Cron { cron_expression } => {
                parse_cron(cron_expression)?;
            }
            _ => {}
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end <= start {
                return Err(CoreError::Validation(
                    "schedule.end_date must be after schedule.start_date".into(),
                ));
            }
        }
        Ok(())
    }

    /// Compute the next run strictly after `now`.
    ///
    /// `has_run` tells a one-shot trigger whether its single run already happened.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the cron expression does not parse.
    pub fn next_run_after(
        &self,
        now: DateTime<Utc>,
        has_run: bool,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        if !self.enabled {
            return Ok(None);
        }
        let from = match self.start_date {
            Some(start) if start > now => start - Duration::seconds(1),
            _ => now,
        };
        let candidate = match &self.trigger {
            TriggerSpec::Manual => None,
            TriggerSpec::Once { scheduled_time } => {
                (!has_run && *scheduled_time > now).then_some(*scheduled_time)
            }
            TriggerSpec::Interval { interval_seconds } => {
                let secs = i64::try_from(*interval_seconds).map_err(|_| {
                    CoreError::Validation("schedule.interval_seconds is too large".into())
                })?;
                let next = now + Duration::seconds(secs);
                Some(self.start_date.map_or(next, |start| next.max(start)))
            }
            TriggerSpec::Cron { cron_expression } => {
                parse_cron(cron_expression)?.after(&from).next()
            }
        };
        Ok(candidate.filter(|at| self.end_date.is_none_or(|end| *at <= end)))
    }
}

/// Parse a seconds-resolution cron expression.
///
/// # Errors
///
/// Returns `CoreError::Validation` with the parser message.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, CoreError> {
    cron::Schedule::from_str(expression.trim()).map_err(|e| {
        CoreError::Validation(format!("invalid cron expression '{expression}': {e}"))
    })
}
