//! Prompt templates for the generation gateway.

use crate::practice::{PracticeSession, PracticeType, Rating, UserProgress};
use crate::profile::UserProfile;

/// Persona shared by every request.
pub const SYSTEM_PROMPT: &str = "\
You are a warm, knowledgeable yoga instructor who coaches people through a \
chat app. You adapt every suggestion to the person's experience and health, \
you never push through pain, and you keep answers practical and encouraging. \
Use short paragraphs. You may use *bold* and _italics_ for emphasis but no \
other formatting. If a question needs a doctor, say so plainly.";

/// One-paragraph description of the user for prompt context.
pub fn profile_context(profile: &UserProfile) -> String {
    let experience = profile
        .experience_level
        .map_or("unknown", |e| e.as_str());
    let health = if profile.health_conditions.is_empty() {
        "none reported".to_string()
    } else {
        profile.health_conditions.join(", ")
    };
    let duration = profile
        .available_duration
        .map_or_else(|| "unknown".to_string(), |d| format!("{d} minutes"));

    format!(
        "User profile:\n- Goals: {}\n- Experience: {experience}\n- Health conditions: {health}\n- Preferred session length: {duration}",
        profile.goals.as_deref().unwrap_or("not specified"),
    )
}

pub fn practice_prompt(profile: &UserProfile, practice_type: PracticeType, duration: u32) -> String {
    format!(
        "{}\n\nCreate a personalized {} lasting about {duration} minutes.\n\
         Structure it as: a short intention, a warm-up, the main sequence with \
         timings, and a closing. For each element give clear cues and one \
         easier modification. Respect every health condition listed above. \
         Finish with one sentence of encouragement.",
        profile_context(profile),
        practice_type.describe(),
    )
}

/// Onboarding step the user just answered, for a short acknowledgement.
pub fn onboarding_reply_prompt(step: &str, answer: &str) -> String {
    format!(
        "A new student is setting up their yoga profile. For the question about \
         their {step} they answered: \"{answer}\".\n\
         Reply with one or two friendly sentences acknowledging the answer. Do \
         not ask any question and do not give a practice yet."
    )
}

pub fn general_prompt(profile: Option<&UserProfile>, message: &str) -> String {
    match profile {
        Some(profile) => format!("{}\n\nThe user asks: {message}", profile_context(profile)),
        None => format!("The user asks: {message}"),
    }
}

/// Summary request. The length limit is advisory.
pub fn summary_prompt(practice: &PracticeSession, rating: Rating) -> String {
    format!(
        "The user just finished this {} ({} minutes) and rated it {}/5.\n\n\
         Practice:\n{}\n\n\
         Write a short, encouraging summary of what they practised and one \
         tip for next time. Keep it under 500 characters.",
        practice.practice_type.describe(),
        practice.duration,
        rating.stars(),
        practice.content.text,
    )
}

pub fn insight_prompt(
    profile: &UserProfile,
    progress: &UserProgress,
    recent: &[PracticeSession],
) -> String {
    let average = progress
        .average_rating
        .map_or_else(|| "n/a".to_string(), |a| format!("{a:.1}"));
    let history = if recent.is_empty() {
        "no completed practices yet".to_string()
    } else {
        recent
            .iter()
            .map(|p| {
                format!(
                    "- {} for {} min, rated {}",
                    p.practice_type,
                    p.duration,
                    p.rating.map_or(0, |r| r.stars())
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "{}\n\nProgress: {} practices completed, {} minutes in total, average rating {average}.\n\
         Recent practices:\n{history}\n\n\
         Give one observation about their progress and one concrete suggestion \
         for the coming week, in at most four sentences.",
        profile_context(profile),
        progress.practices_completed,
        progress.total_practice_minutes,
    )
}
