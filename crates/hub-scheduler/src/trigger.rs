//! One trigger abstraction over every way a task can be woken.

use std::time::Duration;

use chrono::{DateTime, Utc};

use hub_core::entities::SyncTask;
use hub_core::errors::CoreError;
use hub_core::schedule::{ScheduleConfig, TriggerSpec, parse_cron};

#[derive(Debug, Clone)]
pub enum TriggerKind {
    Manual,
    Once(DateTime<Utc>),
    /// Polled on the scheduler tick.
    Interval(Duration),
    /// Evaluated at second resolution by its own timer.
    Cron(Box<cron::Schedule>),
}

/// A task's trigger plus its active window.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Trigger {
    /// A disabled schedule resolves to a manual trigger.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an unparseable cron expression.
    pub fn from_schedule(schedule: &ScheduleConfig) -> Result<Self, CoreError> {
        let kind = if schedule.enabled {
            match &schedule.trigger {
                TriggerSpec::Manual => TriggerKind::Manual,
                TriggerSpec::Once { scheduled_time } => TriggerKind::Once(*scheduled_time),
                TriggerSpec::Interval { interval_seconds } => {
                    TriggerKind::Interval(Duration::from_secs(*interval_seconds))
                }
                TriggerSpec::Cron { cron_expression } => {
                    TriggerKind::Cron(Box::new(parse_cron(cron_expression)?))
                }
            }
        } else {
            TriggerKind::Manual
        };
        Ok(Self {
            kind,
            start: schedule.start_date,
            end: schedule.end_date,
        })
    }

    /// # Errors
    ///
    /// See [`Trigger::from_schedule`].
    pub fn for_task(task: &SyncTask) -> Result<Self, CoreError> {
        Self::from_schedule(&task.schedule)
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self.kind {
            TriggerKind::Manual => "manual",
            TriggerKind::Once(_) => "once",
            TriggerKind::Interval(_) => "interval",
            TriggerKind::Cron(_) => "cron",
        }
    }

    /// Whether the trigger owns a timer. Interval triggers ride the tick and
    /// manual ones are never woken.
    #[must_use]
    pub const fn is_timed(&self) -> bool {
        matches!(self.kind, TriggerKind::Once(_) | TriggerKind::Cron(_))
    }

    /// Next fire time strictly after `after`, inside the window.
    #[must_use]
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = match self.start {
            Some(start) if start > after => start - chrono::Duration::seconds(1),
            _ => after,
        };
        let next = match &self.kind {
            TriggerKind::Manual => None,
            TriggerKind::Once(at) => (*at > after).then_some(*at),
            TriggerKind::Interval(every) => {
                let every = chrono::Duration::from_std(*every).ok()?;
                Some(from + every)
            }
            TriggerKind::Cron(schedule) => schedule.after(&from).next(),
        }?;
        self.end.is_none_or(|end| next <= end).then_some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn cron_fires_at_second_resolution() {
        let trigger = Trigger::from_schedule(&ScheduleConfig::new(TriggerSpec::Cron {
            cron_expression: "*/15 * * * * *".into(),
        }))
        .unwrap();
        assert_eq!(trigger.kind(), "cron");
        assert!(trigger.is_timed());
        assert_eq!(trigger.next_fire(at(8, 0, 1)), Some(at(8, 0, 15)));
        assert_eq!(trigger.next_fire(at(8, 0, 15)), Some(at(8, 0, 30)));
    }

    #[test]
    fn once_fires_a_single_time() {
        let trigger = Trigger::from_schedule(&ScheduleConfig::new(TriggerSpec::Once {
            scheduled_time: at(9, 0, 0),
        }))
        .unwrap();
        assert_eq!(trigger.next_fire(at(8, 0, 0)), Some(at(9, 0, 0)));
        assert_eq!(trigger.next_fire(at(9, 0, 0)), None);
    }

    #[test]
    fn window_bounds_every_trigger() {
        let mut schedule = ScheduleConfig::new(TriggerSpec::Cron {
            cron_expression: "0 0 * * * *".into(),
        });
        schedule.start_date = Some(at(10, 0, 0));
        schedule.end_date = Some(at(12, 0, 0));
        let trigger = Trigger::from_schedule(&schedule).unwrap();

        assert_eq!(trigger.next_fire(at(8, 30, 0)), Some(at(10, 0, 0)));
        assert_eq!(trigger.next_fire(at(11, 0, 0)), Some(at(12, 0, 0)));
        assert_eq!(trigger.next_fire(at(12, 0, 0)), None);
    }

    #[test]
    fn interval_is_polled_not_timed() {
        let trigger = Trigger::from_schedule(&ScheduleConfig::new(TriggerSpec::Interval {
            interval_seconds: 90,
        }))
        .unwrap();
        assert!(!trigger.is_timed());
        assert_eq!(trigger.next_fire(at(8, 0, 0)), Some(at(8, 1, 30)));
    }

    #[test]
    fn disabled_schedules_are_manual() {
        let mut schedule = ScheduleConfig::new(TriggerSpec::Interval { interval_seconds: 5 });
        schedule.enabled = false;
        let trigger = Trigger::from_schedule(&schedule).unwrap();
        assert_eq!(trigger.kind(), "manual");
        assert_eq!(trigger.next_fire(at(8, 0, 0)), None);
    }

    #[test]
    fn bad_cron_is_a_validation_error() {
        let err = Trigger::from_schedule(&ScheduleConfig::new(TriggerSpec::Cron {
            cron_expression: "often".into(),
        }))
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
