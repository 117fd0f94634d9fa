//! Message texts and renderers.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::practice::{PracticeSession, UserProgress};
use crate::profile::{ReminderFrequency, UserProfile};

pub const GENERIC_ERROR: &str = "Sorry, something unexpected went wrong. 😥";

pub const HELP_TEXT: &str = "\
*How I can help* 🧘

/practice - get a personalized practice
/progress - see your practice history
/profile - view and edit your profile
/settings - reminders and other settings
/onboarding - answer the setup questions again
/cancel - stop the current step

You can also just ask me anything about yoga.";

pub const MAIN_MENU_TEXT: &str = "What would you like to do? 🙏";
pub const SETTINGS_TEXT: &str = "*Settings* ⚙️\n\nWhat would you like to change?";
pub const LANGUAGE_SOON: &str = "Language selection is coming soon. 🌐";
pub const FALLBACK_HINT: &str = "I couldn't answer that right now. 🙏\n\nTry /practice for a session, /progress for your history or /help for everything I can do.";
pub const NOTHING_TO_CANCEL: &str = "There is nothing to cancel. 🙂";
pub const NEEDS_ONBOARDING: &str =
    "Let's get to know each other first. Tap /start to set up your profile. 🌱";

pub const GOALS_PROMPT: &str = "What would you like to achieve with yoga? 🎯\n\nFor example: reduce stress, improve flexibility, sleep better.";
pub const EXPERIENCE_PROMPT: &str = "How much yoga experience do you have? 📈";
pub const HEALTH_PROMPT: &str = "Do you have any health conditions or injuries I should keep in mind? 🏥\n\nWrite them down, or answer \"none\".";
pub const DURATION_PROMPT: &str = "How much time do you usually have for a practice? ⏱";
pub const FREQUENCY_PROMPT: &str = "How often would you like a practice reminder? ⏰";
pub const TIME_PROMPT: &str = "What time should I remind you? Send it as HH:MM, for example 08:30. 🕗";
pub const ONBOARDING_CANCELLED: &str =
    "Setup paused. Tap /onboarding whenever you want to continue. 🌱";

pub const PICK_ONE: &str = "Please pick one of the options below. 👇";
pub const INVALID_TIME: &str =
    "I couldn't read that time. Please send it as HH:MM, with hours 0-23 and minutes 0-59. 🕗";
pub const INVALID_DURATION: &str =
    "Please pick one of the options, or send a number of minutes between 5 and 60. ⏱";
pub const EMPTY_ANSWER: &str = "Please write a few words. ✍️";

pub const EDIT_GOALS_PROMPT: &str = "What are your new goals? 🎯";
pub const EDIT_HEALTH_PROMPT: &str =
    "Describe any health conditions or injuries, or answer \"none\". 🏥";
pub const PROFILE_SAVED: &str = "Saved! ✅";
pub const PROFILE_DONE: &str = "Your profile is up to date. ✅";
pub const PROFILE_EDIT_CANCELLED: &str = "Profile editing stopped. ✅";

pub const REMINDER_DISABLED: &str =
    "Reminders are off. You can turn them on again in Settings. 🔕";
pub const REMINDER_SETUP_CANCELLED: &str = "Reminder settings left unchanged. ⏰";

pub const PRACTICE_TYPE_PROMPT: &str = "What kind of practice would you like today? 🧘";
pub const GENERATING: &str = "Preparing your practice... 🧘";
pub const GENERATION_FAILED: &str =
    "I couldn't prepare a practice right now. Please try again in a moment. 🙏";
pub const COMPLETION_PROMPT: &str =
    "Take your time. Let me know when you've finished, or ask me to remind you later.";
pub const RATING_PROMPT: &str = "Well done! 🎉 How would you rate this practice?";
pub const PRACTICE_CANCELLED: &str = "Practice closed. Come back whenever you're ready. 🙏";
pub const NO_OPEN_PRACTICE: &str =
    "I can't find an unfinished practice. Tap /practice to start a new one. 🧘";
pub const INSIGHT_FAILED: &str = "I couldn't put together an insight right now. 🙏";

pub fn welcome_new(name: &str) -> String {
    format!(
        "Namaste, {name}! 🙏\n\nI'm your personal yoga assistant. I'll put together \
         practices that fit your goals, experience and health, and remind you to \
         practise.\n\nA few quick questions first."
    )
}

pub fn welcome_back(name: &str) -> String {
    format!("Welcome back, {name}! 🙏\n\n{MAIN_MENU_TEXT}")
}

fn frequency_text(frequency: ReminderFrequency) -> &'static str {
    match frequency {
        ReminderFrequency::Off => "off",
        ReminderFrequency::Daily => "every day",
        ReminderFrequency::EveryOtherDay => "every other day",
        ReminderFrequency::Weekdays => "on weekdays",
        ReminderFrequency::Weekends => "on weekends",
    }
}

fn reminder_line(profile: &UserProfile) -> String {
    match profile.reminder {
        Some(reminder) if profile.notifications_enabled => {
            format!("{} at {}", frequency_text(reminder.frequency), reminder.time)
        }
        _ => "off".to_string(),
    }
}

fn health_line(profile: &UserProfile) -> String {
    if profile.health_conditions.is_empty() {
        "none".to_string()
    } else {
        profile.health_conditions.join(", ")
    }
}

fn profile_lines(profile: &UserProfile) -> String {
    format!(
        "🎯 Goals: {}\n📈 Experience: {}\n🏥 Health: {}\n⏱ Practice length: {}\n⏰ Reminders: {}",
        profile.goals.as_deref().unwrap_or("not set"),
        profile
            .experience_level
            .map_or("not set", |level| level.as_str()),
        health_line(profile),
        profile
            .available_duration
            .map_or_else(|| "not set".to_string(), |d| format!("{d} min")),
        reminder_line(profile),
    )
}

/// Closing summary of onboarding.
pub fn onboarding_summary(profile: &UserProfile) -> String {
    format!(
        "*All set!* ✨\n\n{}\n\nShall we start your first practice?",
        profile_lines(profile)
    )
}

pub fn profile_card(profile: &UserProfile) -> String {
    format!(
        "*Your profile* 👤\n\n{}\n\nWhat would you like to change?",
        profile_lines(profile)
    )
}

pub fn reminder_settings_intro(profile: &UserProfile) -> String {
    format!(
        "*Reminders* ⏰\n\nCurrently: {}\n\n{FREQUENCY_PROMPT}",
        reminder_line(profile)
    )
}

pub fn reminder_saved(frequency: ReminderFrequency, time: &str) -> String {
    format!(
        "Done! I'll remind you {} at {time}. ⏰",
        frequency_text(frequency)
    )
}

pub fn practice_message(practice: &PracticeSession) -> String {
    format!(
        "{} *{} practice, {} min*\n\n{}",
        practice.practice_type.emoji(),
        capitalize(practice.practice_type.as_str()),
        practice.duration,
        practice.content.text
    )
}

pub fn postponed(hours: u32) -> String {
    let unit = if hours == 1 { "hour" } else { "hours" };
    format!("No problem! I'll remind you in {hours} {unit}. ⏰")
}

pub fn practice_completed(rating_stars: &str, summary: Option<&str>) -> String {
    match summary {
        Some(summary) => format!("Thank you for your rating {rating_stars}!\n\n{summary}"),
        None => format!("Thank you for your rating {rating_stars}! See you on the mat. 🙏"),
    }
}

pub fn insight_message(insight: &str) -> String {
    format!("💡 *Insight*\n\n{insight}")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub const PROGRESS_PAGE_SIZE: u32 = 5;

/// Number of progress pages for `total` completed practices.
pub fn page_count(total: u32) -> u32 {
    total.div_ceil(PROGRESS_PAGE_SIZE).max(1)
}

/// One page of completed practices, ready to render.
#[derive(Debug, Clone)]
pub struct ProgressPage {
    pub page: u32,
    pub total_pages: u32,
    pub total: u32,
    pub items: Vec<PracticeSession>,
    pub progress: Option<UserProgress>,
}

fn local_stamp(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%d.%m %H:%M").to_string()
}

pub fn progress_page(page: &ProgressPage, tz: Tz) -> String {
    if page.total == 0 {
        return "*Your progress* 📊\n\nNo completed practices yet. Tap /practice to begin! 🧘"
            .to_string();
    }

    let mut out = format!("*Your progress* 📊\n\nCompleted practices: {}", page.total);
    if let Some(progress) = &page.progress {
        out.push_str(&format!(
            "\nTotal time: {} min",
            progress.total_practice_minutes
        ));
        if let Some(avg) = progress.average_rating {
            out.push_str(&format!("\nAverage rating: {avg:.1} ⭐"));
        }
    }
    out.push_str(&format!("\n\nPage {}/{}\n", page.page, page.total_pages));

    for practice in &page.items {
        let when = practice.completed_at.unwrap_or(practice.created_at);
        out.push_str(&format!(
            "\n{} {} · {} min",
            practice.practice_type.emoji(),
            local_stamp(when, tz),
            practice.duration
        ));
        if let Some(rating) = practice.rating {
            out.push_str(&format!(" · {}", rating.as_stars()));
        }
        if let Some(feedback) = practice.feedback.as_deref().filter(|f| !f.is_empty()) {
            out.push_str(&format!("\n_{}_", truncate(feedback, 120)));
        }
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
