//! Reminder scheduler.
//!
//! Keeps at most one regular and one postponed job per user. Each job is a
//! tokio task that sleeps until its next fire time and delivers a fixed
//! message through the channel. Replacing a job aborts the previous task
//! under the registry lock, so the last registration for a key wins.

pub mod trigger;

pub use trigger::{EVERY_OTHER_DAY, Trigger, next_local_occurrence};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;

use crate::channels::{Channel, OutgoingResponse};
use crate::error::{DatabaseError, SchedulerError};
use crate::profile::{ReminderFrequency, ReminderTime};
use crate::store::Database;

pub const REMINDER_MESSAGE: &str = "Hi! Time for your yoga practice. Your body and mind will thank you! 🙏🧘\n\nTap /practice to begin.";

pub const POSTPONED_MESSAGE: &str =
    "Hi! It's time for your yoga practice. Shall we start? 🙏\n\nUse /practice to pick a session.";

/// What a job is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPurpose {
    Regular,
    Postponed,
}

/// Registry key: one job per purpose per user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub purpose: JobPurpose,
    pub user_id: String,
}

impl JobKey {
    pub fn regular(user_id: impl Into<String>) -> Self {
        Self {
            purpose: JobPurpose::Regular,
            user_id: user_id.into(),
        }
    }

    pub fn postponed(user_id: impl Into<String>) -> Self {
        Self {
            purpose: JobPurpose::Postponed,
            user_id: user_id.into(),
        }
    }

    fn message(&self) -> &'static str {
        match self.purpose {
            JobPurpose::Regular => REMINDER_MESSAGE,
            JobPurpose::Postponed => POSTPONED_MESSAGE,
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.purpose {
            JobPurpose::Regular => write!(f, "reminder:{}", self.user_id),
            JobPurpose::Postponed => write!(f, "postponed:{}", self.user_id),
        }
    }
}

/// A registered job.
#[derive(Debug)]
struct JobEntry {
    generation: u64,
    handle: JoinHandle<()>,
    next_fire: Option<DateTime<Utc>>,
}

struct Registry {
    jobs: Mutex<HashMap<JobKey, JobEntry>>,
    channel: Arc<dyn Channel>,
    timezone: Tz,
    next_generation: AtomicU64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobKey, JobEntry>> {
        // A panic while holding the lock cannot leave the map half-updated,
        // so a poisoned lock is still usable.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-wide reminder job registry.
#[derive(Clone)]
pub struct ReminderScheduler {
    registry: Arc<Registry>,
}

impl ReminderScheduler {
    /// Jobs deliver through `channel`, addressing the user id. Calendar
    /// rules are evaluated in `timezone`.
    pub fn new(channel: Arc<dyn Channel>, timezone: Tz) -> Self {
        Self {
            registry: Arc::new(Registry {
                jobs: Mutex::new(HashMap::new()),
                channel,
                timezone,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Register the user's regular reminder, replacing any previous one.
    /// `Off` cancels instead.
    pub fn schedule(
        &self,
        user_id: &str,
        time: ReminderTime,
        frequency: ReminderFrequency,
    ) -> Result<(), SchedulerError> {
        let now = Utc::now();
        match Trigger::for_frequency(frequency, time, self.registry.timezone, now)? {
            Some(trigger) => {
                let key = JobKey::regular(user_id);
                tracing::info!(
                    job = %key,
                    frequency = frequency.as_str(),
                    time = %time,
                    trigger = %trigger,
                    "Scheduling reminder"
                );
                self.register(key, trigger, now);
            }
            None => {
                self.cancel(user_id);
            }
        }
        Ok(())
    }

    /// Remove the user's regular reminder. Returns whether one existed.
    pub fn cancel(&self, user_id: &str) -> bool {
        let key = JobKey::regular(user_id);
        let removed = self.registry.lock().remove(&key);
        match removed {
            Some(entry) => {
                entry.handle.abort();
                tracing::info!(job = %key, "Reminder cancelled");
                true
            }
            None => false,
        }
    }

    /// Register a single reminder `delay` from now, replacing any earlier
    /// postponed reminder for the user.
    pub fn schedule_one_off(&self, user_id: &str, delay: Duration) {
        let now = Utc::now();
        let key = JobKey::postponed(user_id);
        let trigger = Trigger::once_after(delay, now);
        tracing::info!(job = %key, delay_secs = delay.as_secs(), "Scheduling postponed reminder");
        self.register(key, trigger, now);
    }

    /// Re-register regular reminders for every user with reminders enabled.
    /// A user whose reminder cannot be registered is logged and skipped.
    /// Returns the number of jobs registered.
    pub async fn rehydrate_all(&self, store: &dyn Database) -> Result<usize, DatabaseError> {
        let users = store.list_reminder_users().await?;
        let mut registered = 0;
        for user in &users {
            let Some(reminder) = user.reminder.as_ref() else {
                continue;
            };
            match self.schedule(&user.user_id, reminder.time, reminder.frequency) {
                Ok(()) if reminder.frequency != ReminderFrequency::Off => registered += 1,
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(user_id = %user.user_id, error = %e, "Skipping reminder during rehydration");
                }
            }
        }
        tracing::info!(candidates = users.len(), registered, "Reminders rehydrated");
        Ok(registered)
    }

    pub fn job_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn has_job(&self, key: &JobKey) -> bool {
        self.registry.lock().contains_key(key)
    }

    pub fn next_fire(&self, key: &JobKey) -> Option<DateTime<Utc>> {
        self.registry.lock().get(key).and_then(|e| e.next_fire)
    }

    /// Abort every job.
    pub fn shutdown(&self) {
        let mut jobs = self.registry.lock();
        let count = jobs.len();
        for (_, entry) in jobs.drain() {
            entry.handle.abort();
        }
        tracing::info!(jobs = count, "Reminder scheduler stopped");
    }

    fn register(&self, key: JobKey, trigger: Trigger, now: DateTime<Utc>) {
        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let next_fire = trigger.next_after(self.registry.timezone, now);

        // The task is spawned under the lock so it cannot observe the map
        // before its own entry is in place.
        let mut jobs = self.registry.lock();
        let handle = tokio::spawn(run_job(
            Arc::downgrade(&self.registry),
            key.clone(),
            generation,
            trigger,
        ));
        let previous = jobs.insert(
            key.clone(),
            JobEntry {
                generation,
                handle,
                next_fire,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
            tracing::debug!(job = %key, "Replaced existing job");
        }
    }
}

async fn run_job(registry: Weak<Registry>, key: JobKey, generation: u64, trigger: Trigger) {
    let mut after = Utc::now();
    loop {
        let Some(timezone) = registry.upgrade().map(|r| r.timezone) else {
            return;
        };
        let Some(fire_at) = trigger.next_after(timezone, after) else {
            break;
        };
        let wait = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        let Some(reg) = registry.upgrade() else {
            return;
        };
        deliver(reg.channel.as_ref(), &key).await;

        after = Utc::now().max(fire_at);
        if trigger.is_once() {
            break;
        }
        let upcoming = trigger.next_after(timezone, after);
        if let Some(entry) = reg.lock().get_mut(&key) {
            if entry.generation == generation {
                entry.next_fire = upcoming;
            }
        }
    }

    if let Some(reg) = registry.upgrade() {
        let mut jobs = reg.lock();
        if jobs.get(&key).is_some_and(|e| e.generation == generation) {
            jobs.remove(&key);
            tracing::debug!(job = %key, "Job finished");
        }
    }
}

async fn deliver(channel: &dyn Channel, key: &JobKey) {
    let response = OutgoingResponse::text(key.message());
    match channel.send(&key.user_id, response).await {
        Ok(()) => tracing::info!(job = %key, "Reminder delivered"),
        Err(e) => tracing::warn!(job = %key, error = %e, "Reminder delivery failed"),
    }
}
