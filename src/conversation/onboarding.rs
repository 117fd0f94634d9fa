//! Onboarding flow.
//!
//! Goals → Experience → Health → Duration → ReminderFrequency →
//! [ReminderTime] → Confirmation. Answers collect in a draft and the
//! profile is written once, when the last answer arrives. The
//! confirmation summary ends the flow; its buttons are global navigation.

use std::time::Duration;

use crate::channels::{Keyboard, OutgoingResponse};
use crate::error::Error;
use crate::presentation::menus::{self, Choice};
use crate::presentation::render;
use crate::profile::{
    ExperienceLevel, ReminderFrequency, ReminderTime, UserProfile, parse_duration_minutes,
    parse_health_conditions,
};

use super::flow::{EngineDeps, Outcome};

const GOALS_ACK_FALLBACK: &str = "Wonderful goals! 🎯";

/// The goals acknowledgement is a nicety; past this the static one is sent.
const GOALS_ACK_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingStep {
    Goals,
    Experience,
    Health,
    Duration,
    ReminderFrequency,
    ReminderTime,
}

/// Answers given so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnboardingDraft {
    pub goals: Option<String>,
    pub experience: Option<ExperienceLevel>,
    pub health: Vec<String>,
    pub duration: Option<u32>,
    pub frequency: Option<ReminderFrequency>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingFlow {
    pub step: OnboardingStep,
    pub draft: OnboardingDraft,
}

impl OnboardingFlow {
    fn at(step: OnboardingStep, draft: OnboardingDraft) -> Self {
        Self { step, draft }
    }
}

/// Begin (or restart) onboarding. `greeting` goes in front of the first
/// question.
pub async fn start(
    deps: &EngineDeps,
    profile: &mut UserProfile,
    greeting: Option<String>,
) -> Result<Outcome<OnboardingFlow>, Error> {
    if profile.current_state != UserProfile::STATE_ONBOARDING {
        profile.current_state = UserProfile::STATE_ONBOARDING.to_string();
        deps.store.save_profile(profile).await?;
    }
    let text = match greeting {
        Some(greeting) => format!("{greeting}\n\n{}", render::GOALS_PROMPT),
        None => render::GOALS_PROMPT.to_string(),
    };
    Ok(Outcome::next(
        OnboardingFlow::at(OnboardingStep::Goals, OnboardingDraft::default()),
        OutgoingResponse::text(text).with_keyboard(Keyboard::Remove),
    ))
}

pub async fn advance(
    deps: &EngineDeps,
    flow: OnboardingFlow,
    profile: &mut UserProfile,
    input: &str,
    address: &str,
) -> Result<Outcome<OnboardingFlow>, Error> {
    let OnboardingFlow { step, mut draft } = flow;
    let choice = Choice::parse(input);
    let text = input.trim();

    let outcome = match step {
        OnboardingStep::Goals => {
            if text.is_empty() {
                return Ok(stay(step, draft, render::EMPTY_ANSWER, None));
            }
            draft.goals = Some(text.to_string());
            let call = deps.gateway.generate_onboarding_reply("goals", text);
            let ack = match deps.generate_within(address, GOALS_ACK_TIMEOUT, call).await {
                Ok(ack) if !ack.trim().is_empty() => ack,
                Ok(_) => GOALS_ACK_FALLBACK.to_string(),
                Err(e) => {
                    tracing::warn!(user_id = %profile.user_id, error = %e, "Onboarding acknowledgement failed");
                    GOALS_ACK_FALLBACK.to_string()
                }
            };
            Outcome::next(
                OnboardingFlow::at(OnboardingStep::Experience, draft),
                OutgoingResponse::text(format!("{ack}\n\n{}", render::EXPERIENCE_PROMPT))
                    .with_keyboard(menus::experience_keyboard()),
            )
        }
        OnboardingStep::Experience => match choice {
            Some(Choice::Experience(level)) => {
                draft.experience = Some(level);
                Outcome::next(
                    OnboardingFlow::at(OnboardingStep::Health, draft),
                    OutgoingResponse::text(render::HEALTH_PROMPT).with_keyboard(Keyboard::Remove),
                )
            }
            _ => stay(
                step,
                draft,
                render::PICK_ONE,
                Some(menus::experience_keyboard()),
            ),
        },
        OnboardingStep::Health => {
            if text.is_empty() {
                return Ok(stay(step, draft, render::EMPTY_ANSWER, None));
            }
            draft.health = parse_health_conditions(text);
            Outcome::next(
                OnboardingFlow::at(OnboardingStep::Duration, draft),
                OutgoingResponse::text(render::DURATION_PROMPT)
                    .with_keyboard(menus::duration_keyboard()),
            )
        }
        OnboardingStep::Duration => {
            let minutes = match choice {
                Some(Choice::Duration(minutes)) => Some(minutes),
                _ => parse_duration_minutes(text),
            };
            match minutes {
                Some(minutes) => {
                    draft.duration = Some(minutes);
                    Outcome::next(
                        OnboardingFlow::at(OnboardingStep::ReminderFrequency, draft),
                        OutgoingResponse::text(render::FREQUENCY_PROMPT)
                            .with_keyboard(menus::frequency_keyboard()),
                    )
                }
                None => stay(
                    step,
                    draft,
                    render::INVALID_DURATION,
                    Some(menus::duration_keyboard()),
                ),
            }
        }
        OnboardingStep::ReminderFrequency => match choice {
            Some(Choice::Frequency(ReminderFrequency::Off)) => {
                draft.frequency = Some(ReminderFrequency::Off);
                finish(deps, draft, profile, None).await?
            }
            Some(Choice::Frequency(frequency)) => {
                draft.frequency = Some(frequency);
                Outcome::next(
                    OnboardingFlow::at(OnboardingStep::ReminderTime, draft),
                    OutgoingResponse::text(render::TIME_PROMPT).with_keyboard(Keyboard::Remove),
                )
            }
            _ => stay(
                step,
                draft,
                render::PICK_ONE,
                Some(menus::frequency_keyboard()),
            ),
        },
        OnboardingStep::ReminderTime => match ReminderTime::parse(text) {
            Ok(time) => finish(deps, draft, profile, Some(time)).await?,
            Err(_) => stay(step, draft, render::INVALID_TIME, None),
        },
    };
    Ok(outcome)
}

fn stay(
    step: OnboardingStep,
    draft: OnboardingDraft,
    text: &str,
    keyboard: Option<Keyboard>,
) -> Outcome<OnboardingFlow> {
    let mut reply = OutgoingResponse::text(text);
    reply.keyboard = keyboard;
    Outcome::next(OnboardingFlow::at(step, draft), reply)
}

/// Write the collected answers, register or drop the reminder and show
/// the confirmation summary.
async fn finish(
    deps: &EngineDeps,
    draft: OnboardingDraft,
    profile: &mut UserProfile,
    time: Option<ReminderTime>,
) -> Result<Outcome<OnboardingFlow>, Error> {
    let mut updated = profile.clone();
    updated.goals = draft.goals;
    updated.experience_level = draft.experience;
    updated.health_conditions = draft.health;
    updated.available_duration = draft.duration;
    updated.set_reminder(draft.frequency.unwrap_or(ReminderFrequency::Off), time);
    updated.current_state = UserProfile::STATE_ACTIVE.to_string();
    deps.store.save_profile(&updated).await?;
    *profile = updated;

    super::sync_reminder(deps, profile);
    tracing::info!(user_id = %profile.user_id, "Onboarding completed");

    Ok(Outcome::done(
        OutgoingResponse::markdown(render::onboarding_summary(profile))
            .with_keyboard(menus::confirmation_keyboard()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::test_support::harness;
    use crate::profile::NewUser;
    use crate::scheduler::JobKey;
    use crate::store::Database;

    async fn drive(
        deps: &EngineDeps,
        profile: &mut UserProfile,
        inputs: &[&str],
    ) -> Outcome<OnboardingFlow> {
        let mut outcome = start(deps, profile, None).await.unwrap();
        for input in inputs {
            let flow = outcome.next.clone().expect("flow ended early");
            outcome = advance(deps, flow, profile, input, "1").await.unwrap();
        }
        outcome
    }

    #[tokio::test]
    async fn scripted_onboarding_saves_profile() {
        let h = harness().await;
        let mut profile = h.store.create_user(&NewUser::new("1")).await.unwrap();

        let outcome = drive(
            &h.deps,
            &mut profile,
            &["reduce stress", "beginner", "none", "15-30", "daily", "08:30"],
        )
        .await;
        assert!(outcome.next.is_none());
        assert_eq!(outcome.reply.keyboard, Some(menus::confirmation_keyboard()));

        let stored = h.store.get_user("1").await.unwrap().unwrap();
        assert_eq!(stored.goals.as_deref(), Some("reduce stress"));
        assert_eq!(stored.experience_level, Some(ExperienceLevel::Beginner));
        assert!(stored.health_conditions.is_empty());
        assert_eq!(stored.available_duration, Some(30));
        let reminder = stored.reminder.unwrap();
        assert_eq!(reminder.frequency, ReminderFrequency::Daily);
        assert_eq!(reminder.time.to_string(), "08:30");
        assert!(stored.notifications_enabled);
        assert_eq!(stored.current_state, UserProfile::STATE_ACTIVE);
        assert!(h.deps.scheduler.has_job(&JobKey::regular("1")));
    }

    #[tokio::test]
    async fn disabling_reminders_skips_time() {
        let h = harness().await;
        let mut profile = h.store.create_user(&NewUser::new("2")).await.unwrap();

        let outcome = drive(
            &h.deps,
            &mut profile,
            &["sleep better", "Advanced 🌳", "bad knee", "45", "Disable reminders 🔕"],
        )
        .await;
        assert!(outcome.next.is_none());

        let stored = h.store.get_user("2").await.unwrap().unwrap();
        assert_eq!(stored.health_conditions, vec!["bad knee".to_string()]);
        assert_eq!(stored.available_duration, Some(45));
        assert!(stored.reminder.is_none());
        assert!(!stored.notifications_enabled);
        assert_eq!(h.deps.scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn invalid_times_reprompt_without_advancing() {
        let h = harness().await;
        let mut profile = h.store.create_user(&NewUser::new("3")).await.unwrap();
        let outcome = drive(
            &h.deps,
            &mut profile,
            &["calm", "beginner", "none", "5-15", "weekends"],
        )
        .await;
        let waiting = outcome.next.unwrap();
        assert_eq!(waiting.step, OnboardingStep::ReminderTime);

        for bad in ["25:00", "08:60", "abc"] {
            let outcome = advance(&h.deps, waiting.clone(), &mut profile, bad, "3")
                .await
                .unwrap();
            assert_eq!(outcome.next.as_ref(), Some(&waiting), "{bad}");
            assert_eq!(outcome.reply.content, render::INVALID_TIME);
        }
        assert!(h.store.get_user("3").await.unwrap().unwrap().goals.is_none());

        let outcome = advance(&h.deps, waiting, &mut profile, "0:5", "3")
            .await
            .unwrap();
        assert!(outcome.next.is_none());
        let stored = h.store.get_user("3").await.unwrap().unwrap();
        assert_eq!(stored.reminder.unwrap().time.to_string(), "00:05");
    }

    #[tokio::test]
    async fn unknown_choice_reprompts_same_step() {
        let h = harness().await;
        let mut profile = h.store.create_user(&NewUser::new("4")).await.unwrap();
        let outcome = drive(&h.deps, &mut profile, &["strength", "guru"]).await;
        assert_eq!(outcome.next.unwrap().step, OnboardingStep::Experience);
        assert_eq!(outcome.reply.content, render::PICK_ONE);
    }

    #[tokio::test]
    async fn goals_ack_falls_back_when_generation_fails() {
        let h = harness().await;
        h.llm.fail();
        let mut profile = h.store.create_user(&NewUser::new("5")).await.unwrap();
        let outcome = drive(&h.deps, &mut profile, &["balance"]).await;
        assert!(outcome.reply.content.starts_with(GOALS_ACK_FALLBACK));
        assert_eq!(outcome.next.unwrap().draft.goals.as_deref(), Some("balance"));
    }

    #[tokio::test]
    async fn slow_goals_ack_does_not_hold_up_onboarding() {
        let mut h = harness().await;
        h.llm.stall();
        h.deps.generation_timeout = Duration::from_millis(50);
        let mut profile = h.store.create_user(&NewUser::new("6")).await.unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            drive(&h.deps, &mut profile, &["balance"]),
        )
        .await
        .expect("acknowledgement was not cut off");

        assert!(outcome.reply.content.starts_with(GOALS_ACK_FALLBACK));
        assert!(outcome.reply.content.contains(render::EXPERIENCE_PROMPT));
        assert_eq!(outcome.next.unwrap().step, OnboardingStep::Experience);
    }
}
