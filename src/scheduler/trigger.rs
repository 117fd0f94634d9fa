//! Reminder triggers and next-fire computation.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::SchedulerError;
use crate::profile::{ReminderFrequency, ReminderTime};

/// Fixed period of the every-other-day reminder. This is wall-clock
/// seconds, so the local fire time shifts by an hour across DST changes.
pub const EVERY_OTHER_DAY: Duration = Duration::from_secs(172_800);

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Calendar rule evaluated in the reference time zone.
    Cron {
        expression: String,
        schedule: cron::Schedule,
    },
    /// Fixed period counted from `anchor`.
    Interval {
        anchor: DateTime<Utc>,
        every: Duration,
    },
    /// Single instant.
    Once { at: DateTime<Utc> },
}

impl Trigger {
    /// Trigger for a regular reminder, or `None` when reminders are off.
    pub fn for_frequency(
        frequency: ReminderFrequency,
        time: ReminderTime,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, SchedulerError> {
        let days = match frequency {
            ReminderFrequency::Off => return Ok(None),
            ReminderFrequency::EveryOtherDay => {
                return Ok(Some(Trigger::Interval {
                    anchor: next_local_occurrence(time, tz, now)?,
                    every: EVERY_OTHER_DAY,
                }));
            }
            ReminderFrequency::Daily => "*",
            ReminderFrequency::Weekdays => "Mon-Fri",
            ReminderFrequency::Weekends => "Sat,Sun",
        };
        let expression = format!("0 {} {} * * {days}", time.minute(), time.hour());
        Self::cron(&expression).map(Some)
    }

    pub fn cron(expression: &str) -> Result<Self, SchedulerError> {
        let schedule =
            cron::Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Trigger::Cron {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn once_after(delay: Duration, now: DateTime<Utc>) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        Trigger::Once { at: now + delay }
    }

    pub fn is_once(&self) -> bool {
        matches!(self, Trigger::Once { .. })
    }

    /// First fire strictly after `after`.
    pub fn next_after(&self, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron { schedule, .. } => schedule
                .after(&after.with_timezone(&tz))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            Trigger::Interval { anchor, every } => {
                if *anchor > after {
                    return Some(*anchor);
                }
                let every = chrono::Duration::from_std(*every).ok()?;
                let every_secs = every.num_seconds();
                if every_secs <= 0 {
                    return None;
                }
                let elapsed = (after - *anchor).num_seconds();
                let periods = elapsed / every_secs + 1;
                Some(*anchor + every * i32::try_from(periods).ok()?)
            }
            Trigger::Once { at } => (*at > after).then_some(*at),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Cron { expression, .. } => write!(f, "cron({expression})"),
            Trigger::Interval { anchor, every } => {
                write!(f, "every {}s from {}", every.as_secs(), anchor.to_rfc3339())
            }
            Trigger::Once { at } => write!(f, "once at {}", at.to_rfc3339()),
        }
    }
}

/// Next instant, after `now`, at which the local clock in `tz` reads `time`.
pub fn next_local_occurrence(
    time: ReminderTime,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    let local_today = now.with_timezone(&tz).date_naive();
    for offset in 0..=2 {
        let Some(date) = local_today.checked_add_days(Days::new(offset)) else {
            continue;
        };
        let Some(naive) = date.and_hms_opt(time.hour(), time.minute(), 0) else {
            continue;
        };
        if let Some(candidate) = resolve_local(tz, naive) {
            if candidate > now {
                return Ok(candidate);
            }
        }
    }
    Err(SchedulerError::NoUpcomingFire(time.to_string()))
}

/// Map a local wall-clock time to UTC. Times skipped by a DST jump move
/// forward by an hour.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|t| t.with_timezone(&Utc))
}
