//! Reminder setup flow: `Frequency → Time`, or disable from `Frequency`.

use crate::channels::{Keyboard, OutgoingResponse};
use crate::error::Error;
use crate::presentation::menus::{self, Choice};
use crate::presentation::render;
use crate::profile::{ReminderFrequency, ReminderTime, UserProfile};

use super::flow::{EngineDeps, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderSetupStep {
    Frequency,
    Time { frequency: ReminderFrequency },
}

pub fn start(profile: &UserProfile) -> Outcome<ReminderSetupStep> {
    Outcome::next(
        ReminderSetupStep::Frequency,
        OutgoingResponse::markdown(render::reminder_settings_intro(profile))
            .with_keyboard(menus::frequency_keyboard()),
    )
}

pub async fn advance(
    deps: &EngineDeps,
    step: ReminderSetupStep,
    profile: &mut UserProfile,
    input: &str,
) -> Result<Outcome<ReminderSetupStep>, Error> {
    match step {
        ReminderSetupStep::Frequency => match Choice::parse(input) {
            Some(Choice::Frequency(ReminderFrequency::Off)) => {
                let mut updated = profile.clone();
                updated.clear_reminder();
                deps.store.save_profile(&updated).await?;
                *profile = updated;
                deps.scheduler.cancel(&profile.user_id);
                tracing::info!(user_id = %profile.user_id, "Reminders disabled");
                Ok(Outcome::done(
                    OutgoingResponse::text(render::REMINDER_DISABLED)
                        .with_keyboard(menus::main_menu()),
                ))
            }
            Some(Choice::Frequency(frequency)) => Ok(Outcome::next(
                ReminderSetupStep::Time { frequency },
                OutgoingResponse::text(render::TIME_PROMPT).with_keyboard(Keyboard::Remove),
            )),
            _ => Ok(Outcome::next(
                step,
                OutgoingResponse::text(render::PICK_ONE).with_keyboard(menus::frequency_keyboard()),
            )),
        },
        ReminderSetupStep::Time { frequency } => {
            let Ok(time) = ReminderTime::parse(input) else {
                return Ok(Outcome::next(
                    step,
                    OutgoingResponse::text(render::INVALID_TIME),
                ));
            };
            let mut updated = profile.clone();
            updated.set_reminder(frequency, Some(time));
            deps.store.save_profile(&updated).await?;
            *profile = updated;
            super::sync_reminder(deps, profile);
            Ok(Outcome::done(
                OutgoingResponse::text(render::reminder_saved(frequency, &time.to_string()))
                    .with_keyboard(menus::main_menu()),
            ))
        }
    }
}
