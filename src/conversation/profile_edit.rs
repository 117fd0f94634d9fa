//! Profile edit flow: `Menu → Edit* → Menu`, ending only on "Done".

use crate::channels::{Keyboard, OutgoingResponse};
use crate::error::Error;
use crate::presentation::menus::{self, Choice};
use crate::presentation::render;
use crate::profile::{UserProfile, parse_duration_minutes, parse_health_conditions};

use super::flow::{EngineDeps, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileEditStep {
    Menu,
    EditGoals,
    EditExperience,
    EditHealth,
    EditDuration,
}

fn menu(profile: &UserProfile, prefix: Option<&str>) -> Outcome<ProfileEditStep> {
    let card = render::profile_card(profile);
    let text = match prefix {
        Some(prefix) => format!("{prefix}\n\n{card}"),
        None => card,
    };
    Outcome::next(
        ProfileEditStep::Menu,
        OutgoingResponse::markdown(text).with_keyboard(menus::profile_menu()),
    )
}

fn ask(step: ProfileEditStep, text: &str, keyboard: Keyboard) -> Outcome<ProfileEditStep> {
    Outcome::next(step, OutgoingResponse::text(text).with_keyboard(keyboard))
}

pub fn start(profile: &UserProfile) -> Outcome<ProfileEditStep> {
    menu(profile, None)
}

pub async fn advance(
    deps: &EngineDeps,
    step: ProfileEditStep,
    profile: &mut UserProfile,
    input: &str,
) -> Result<Outcome<ProfileEditStep>, Error> {
    let choice = Choice::parse(input);
    let text = input.trim();

    let outcome = match step {
        ProfileEditStep::Menu => match choice {
            Some(Choice::EditGoals) => ask(
                ProfileEditStep::EditGoals,
                render::EDIT_GOALS_PROMPT,
                Keyboard::Remove,
            ),
            Some(Choice::EditExperience) => ask(
                ProfileEditStep::EditExperience,
                render::EXPERIENCE_PROMPT,
                menus::experience_keyboard(),
            ),
            Some(Choice::EditHealth) => ask(
                ProfileEditStep::EditHealth,
                render::EDIT_HEALTH_PROMPT,
                Keyboard::Remove,
            ),
            Some(Choice::EditDuration) => ask(
                ProfileEditStep::EditDuration,
                render::DURATION_PROMPT,
                menus::duration_keyboard(),
            ),
            Some(Choice::Done) => Outcome::done(
                OutgoingResponse::text(render::PROFILE_DONE).with_keyboard(menus::main_menu()),
            ),
            _ => ask(step, render::PICK_ONE, menus::profile_menu()),
        },
        ProfileEditStep::EditGoals => {
            if text.is_empty() {
                return Ok(ask(step, render::EMPTY_ANSWER, Keyboard::Remove));
            }
            let mut updated = profile.clone();
            updated.goals = Some(text.to_string());
            save(deps, profile, updated).await?
        }
        ProfileEditStep::EditExperience => match choice {
            Some(Choice::Experience(level)) => {
                let mut updated = profile.clone();
                updated.experience_level = Some(level);
                save(deps, profile, updated).await?
            }
            _ => ask(step, render::PICK_ONE, menus::experience_keyboard()),
        },
        ProfileEditStep::EditHealth => {
            if text.is_empty() {
                return Ok(ask(step, render::EMPTY_ANSWER, Keyboard::Remove));
            }
            let mut updated = profile.clone();
            updated.health_conditions = parse_health_conditions(text);
            save(deps, profile, updated).await?
        }
        ProfileEditStep::EditDuration => {
            let minutes = match choice {
                Some(Choice::Duration(minutes)) => Some(minutes),
                _ => parse_duration_minutes(text),
            };
            match minutes {
                Some(minutes) => {
                    let mut updated = profile.clone();
                    updated.available_duration = Some(minutes);
                    save(deps, profile, updated).await?
                }
                None => ask(step, render::INVALID_DURATION, menus::duration_keyboard()),
            }
        }
    };
    Ok(outcome)
}

async fn save(
    deps: &EngineDeps,
    profile: &mut UserProfile,
    updated: UserProfile,
) -> Result<Outcome<ProfileEditStep>, Error> {
    deps.store.save_profile(&updated).await?;
    *profile = updated;
    tracing::debug!(user_id = %profile.user_id, "Profile updated");
    Ok(menu(profile, Some(render::PROFILE_SAVED)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::test_support::{harness, onboarded_user};
    use crate::profile::ExperienceLevel;
    use crate::store::Database;

    #[tokio::test]
    async fn edit_goals_saves_and_returns_to_menu() {
        let h = harness().await;
        let mut profile = onboarded_user(h.store.as_ref(), "1").await;

        let outcome = advance(&h.deps, ProfileEditStep::Menu, &mut profile, "Goals 🎯")
            .await
            .unwrap();
        assert_eq!(outcome.next, Some(ProfileEditStep::EditGoals));

        let outcome = advance(&h.deps, ProfileEditStep::EditGoals, &mut profile, "more energy")
            .await
            .unwrap();
        assert_eq!(outcome.next, Some(ProfileEditStep::Menu));
        assert!(outcome.reply.content.contains("more energy"));

        let stored = h.store.get_user("1").await.unwrap().unwrap();
        assert_eq!(stored.goals.as_deref(), Some("more energy"));
    }

    #[tokio::test]
    async fn edit_experience_requires_a_level() {
        let h = harness().await;
        let mut profile = onboarded_user(h.store.as_ref(), "1").await;

        let outcome = advance(&h.deps, ProfileEditStep::EditExperience, &mut profile, "expert")
            .await
            .unwrap();
        assert_eq!(outcome.next, Some(ProfileEditStep::EditExperience));

        advance(&h.deps, ProfileEditStep::EditExperience, &mut profile, "advanced")
            .await
            .unwrap();
        let stored = h.store.get_user("1").await.unwrap().unwrap();
        assert_eq!(stored.experience_level, Some(ExperienceLevel::Advanced));
    }

    #[tokio::test]
    async fn duration_out_of_range_is_rejected() {
        let h = harness().await;
        let mut profile = onboarded_user(h.store.as_ref(), "1").await;

        let outcome = advance(&h.deps, ProfileEditStep::EditDuration, &mut profile, "90")
            .await
            .unwrap();
        assert_eq!(outcome.next, Some(ProfileEditStep::EditDuration));
        assert_eq!(profile.available_duration, Some(30));

        advance(&h.deps, ProfileEditStep::EditDuration, &mut profile, "30-60 min")
            .await
            .unwrap();
        assert_eq!(profile.available_duration, Some(60));
    }

    #[tokio::test]
    async fn done_ends_the_flow() {
        let h = harness().await;
        let mut profile = onboarded_user(h.store.as_ref(), "1").await;
        let outcome = advance(&h.deps, ProfileEditStep::Menu, &mut profile, "done")
            .await
            .unwrap();
        assert!(outcome.next.is_none());
        assert_eq!(outcome.reply.keyboard, Some(menus::main_menu()));
    }
}
