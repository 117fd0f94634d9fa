//! Conversation flows and the engine that routes events into them.

pub mod commands;
pub mod dispatcher;
pub mod engine;
pub mod flow;
pub mod onboarding;
pub mod practice;
pub mod profile_edit;
pub mod progress;
pub mod reminder_setup;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use commands::Command;
pub use dispatcher::Dispatcher;
pub use engine::ConversationEngine;
pub use flow::{EngineDeps, Outcome};
pub use session::{ActiveFlow, SessionContext, SessionStore};

use crate::profile::UserProfile;

/// Bring the user's regular reminder job in line with their profile.
/// Registration problems are logged; reminders are best-effort.
pub(crate) fn sync_reminder(deps: &EngineDeps, profile: &UserProfile) {
    match profile.reminder.filter(|_| profile.wants_reminders()) {
        Some(reminder) => {
            if let Err(e) =
                deps.scheduler
                    .schedule(&profile.user_id, reminder.time, reminder.frequency)
            {
                tracing::warn!(user_id = %profile.user_id, error = %e, "Could not schedule reminder");
            }
        }
        None => {
            deps.scheduler.cancel(&profile.user_id);
        }
    }
}
