//! Practice session flow.
//!
//! `TypeSelection → (generation) → AwaitingCompletion → Rating`. Postponing
//! from `AwaitingCompletion` registers a one-off reminder and leaves the
//! session open.

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::channels::OutgoingResponse;
use crate::error::Error;
use crate::practice::{PracticeCompletion, PracticeContent, PracticeSession, PracticeType, Rating};
use crate::presentation::menus::{self, Choice};
use crate::presentation::render;
use crate::profile::UserProfile;

use super::flow::{EngineDeps, Outcome};

/// Summaries this short are not worth keeping as feedback.
const MIN_FEEDBACK_CHARS: usize = 10;

const DEFAULT_DURATION_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PracticeStep {
    TypeSelection,
    AwaitingCompletion { practice_id: Uuid },
    Rating { practice_id: Uuid },
}

pub fn start() -> Outcome<PracticeStep> {
    Outcome::next(
        PracticeStep::TypeSelection,
        OutgoingResponse::text(render::PRACTICE_TYPE_PROMPT)
            .with_keyboard(menus::practice_type_keyboard()),
    )
}

pub async fn advance(
    deps: &EngineDeps,
    step: PracticeStep,
    profile: &UserProfile,
    input: &str,
    address: &str,
) -> Result<Outcome<PracticeStep>, Error> {
    let choice = Choice::parse(input);
    match step {
        PracticeStep::TypeSelection => match choice {
            Some(Choice::Practice(practice_type)) => {
                generate(deps, profile, practice_type, address).await
            }
            _ => Ok(Outcome::next(
                step,
                OutgoingResponse::text(render::PICK_ONE)
                    .with_keyboard(menus::practice_type_keyboard()),
            )),
        },
        PracticeStep::AwaitingCompletion { practice_id } => {
            Ok(match awaiting(deps, practice_id, profile, choice) {
                Some(outcome) => outcome,
                None => Outcome::next(
                    step,
                    OutgoingResponse::text(render::COMPLETION_PROMPT)
                        .with_keyboard(menus::completion_keyboard()),
                ),
            })
        }
        PracticeStep::Rating { practice_id } => match choice {
            Some(Choice::Rate(rating)) => complete(deps, practice_id, rating, address).await,
            _ => Ok(Outcome::next(
                step,
                OutgoingResponse::text(render::PICK_ONE).with_keyboard(menus::rating_keyboard()),
            )),
        },
    }
}

/// "Finished" or a postpone button pressed outside the flow. Resolves to
/// the user's most recent unfinished practice. Returns `None` for any
/// other choice.
pub async fn resume(
    deps: &EngineDeps,
    profile: &UserProfile,
    choice: Choice,
) -> Result<Option<Outcome<PracticeStep>>, Error> {
    if !matches!(choice, Choice::Finished | Choice::Postpone { .. }) {
        return Ok(None);
    }
    let Some(open) = deps.store.latest_open_practice(&profile.user_id).await? else {
        return Ok(Some(Outcome::done(
            OutgoingResponse::text(render::NO_OPEN_PRACTICE).with_keyboard(menus::main_menu()),
        )));
    };
    tracing::debug!(user_id = %profile.user_id, practice_id = %open.id, "Resuming open practice");
    Ok(awaiting(deps, open.id, profile, Some(choice)))
}

async fn generate(
    deps: &EngineDeps,
    profile: &UserProfile,
    practice_type: PracticeType,
    address: &str,
) -> Result<Outcome<PracticeStep>, Error> {
    let duration = profile
        .available_duration
        .unwrap_or(DEFAULT_DURATION_MINUTES);

    let generation = match deps
        .generate(
            address,
            deps.gateway.generate_practice(profile, practice_type, duration),
        )
        .await
    {
        Ok(generation) => generation,
        Err(e) => {
            tracing::warn!(user_id = %profile.user_id, error = %e, "Practice generation failed");
            return Ok(Outcome::next(
                PracticeStep::TypeSelection,
                OutgoingResponse::text(render::GENERATION_FAILED)
                    .with_keyboard(menus::practice_type_keyboard()),
            ));
        }
    };

    let mut practice = PracticeSession::started(
        profile.user_id.clone(),
        practice_type,
        duration,
        profile.experience_level,
        PracticeContent {
            text: generation.text,
            model: generation.model,
        },
    );
    practice.personalization_notes = profile.goals.clone();
    deps.store.insert_practice(&practice).await?;
    tracing::info!(
        user_id = %profile.user_id,
        practice_id = %practice.id,
        practice_type = %practice_type,
        model = %practice.content.model,
        "Practice started"
    );

    Ok(Outcome::next(
        PracticeStep::AwaitingCompletion {
            practice_id: practice.id,
        },
        OutgoingResponse::markdown(render::practice_message(&practice))
            .with_keyboard(menus::completion_keyboard()),
    ))
}

fn awaiting(
    deps: &EngineDeps,
    practice_id: Uuid,
    profile: &UserProfile,
    choice: Option<Choice>,
) -> Option<Outcome<PracticeStep>> {
    match choice? {
        Choice::Finished => Some(Outcome::next(
            PracticeStep::Rating { practice_id },
            OutgoingResponse::text(render::RATING_PROMPT).with_keyboard(menus::rating_keyboard()),
        )),
        Choice::Postpone { hours } => {
            deps.scheduler.schedule_one_off(
                &profile.user_id,
                Duration::from_secs(u64::from(hours) * 3600),
            );
            Some(Outcome::done(
                OutgoingResponse::text(render::postponed(hours)).with_keyboard(menus::main_menu()),
            ))
        }
        _ => None,
    }
}

async fn complete(
    deps: &EngineDeps,
    practice_id: Uuid,
    rating: Rating,
    address: &str,
) -> Result<Outcome<PracticeStep>, Error> {
    let completion = PracticeCompletion {
        rating,
        feedback: None,
        completed_at: Utc::now(),
    };
    let practice = deps
        .store
        .complete_practice(practice_id, &completion)
        .await?;

    let summary = match deps
        .generate(address, deps.gateway.generate_summary(&practice, rating))
        .await
    {
        Ok(summary) => Some(summary.trim().to_string()).filter(|s| !s.is_empty()),
        Err(e) => {
            tracing::warn!(practice_id = %practice_id, error = %e, "Summary generation failed");
            None
        }
    };

    if let Some(summary) = summary.as_deref() {
        if summary.chars().count() > MIN_FEEDBACK_CHARS {
            if let Err(e) = deps.store.set_practice_feedback(practice_id, summary).await {
                tracing::warn!(practice_id = %practice_id, error = %e, "Could not store practice summary");
            }
        }
    }

    tracing::info!(
        user_id = %practice.user_id,
        practice_id = %practice_id,
        rating = rating.stars(),
        "Practice completed"
    );
    Ok(Outcome::done(
        OutgoingResponse::text(render::practice_completed(
            &rating.as_stars(),
            summary.as_deref(),
        ))
        .with_keyboard(menus::main_menu()),
    ))
}
