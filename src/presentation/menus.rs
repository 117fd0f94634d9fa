//! Button labels and the choices they stand for.
//!
//! Flows never compare against display text. Inbound text is mapped to a
//! [`Nav`] or [`Choice`] here and the rest of the crate matches on those.

use crate::channels::{InlineButton, Keyboard};
use crate::practice::{PracticeType, Rating};
use crate::profile::{ExperienceLevel, ReminderFrequency};

/// Global navigation targets. Pressing one of these buttons always
/// interrupts whatever flow is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nav {
    StartPractice,
    Progress,
    Profile,
    Settings,
    Help,
    ProfileSettings,
    ReminderSettings,
    Language,
    MainMenu,
}

const NAV_LABELS: &[(&str, Nav)] = &[
    ("Start practice 🧘", Nav::StartPractice),
    ("Yes, let's start! 🚀", Nav::StartPractice),
    ("View progress 📊", Nav::Progress),
    ("My profile 👤", Nav::Profile),
    ("Settings ⚙️", Nav::Settings),
    ("Change settings ⚙️", Nav::Settings),
    ("Help 💡", Nav::Help),
    ("Profile 👤", Nav::ProfileSettings),
    ("Reminders ⏰", Nav::ReminderSettings),
    ("Language 🌐", Nav::Language),
    ("Back 🔙", Nav::MainMenu),
];

impl Nav {
    /// Exact label match only; typed words never navigate.
    pub fn from_label(text: &str) -> Option<Self> {
        let text = text.trim();
        NAV_LABELS
            .iter()
            .find(|(label, _)| *label == text)
            .map(|(_, nav)| *nav)
    }
}

/// A fixed-choice answer inside a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Experience(ExperienceLevel),
    /// Upper bound of a duration bucket, in minutes.
    Duration(u32),
    Frequency(ReminderFrequency),
    EditGoals,
    EditExperience,
    EditHealth,
    EditDuration,
    Done,
    Practice(PracticeType),
    Finished,
    Postpone { hours: u32 },
    Rate(Rating),
}

/// Label, stable identifier, choice.
const CHOICES: &[(&str, &str, Choice)] = &[
    ("Beginner 🌱", "beginner", Choice::Experience(ExperienceLevel::Beginner)),
    (
        "Intermediate 🌿",
        "intermediate",
        Choice::Experience(ExperienceLevel::Intermediate),
    ),
    ("Advanced 🌳", "advanced", Choice::Experience(ExperienceLevel::Advanced)),
    ("5-15 min", "5-15", Choice::Duration(15)),
    ("15-30 min", "15-30", Choice::Duration(30)),
    ("30-60 min", "30-60", Choice::Duration(60)),
    ("Daily", "daily", Choice::Frequency(ReminderFrequency::Daily)),
    (
        "Every other day",
        "every_other_day",
        Choice::Frequency(ReminderFrequency::EveryOtherDay),
    ),
    ("Weekdays", "weekdays", Choice::Frequency(ReminderFrequency::Weekdays)),
    ("Weekends", "weekends", Choice::Frequency(ReminderFrequency::Weekends)),
    (
        "Disable reminders 🔕",
        "disable",
        Choice::Frequency(ReminderFrequency::Off),
    ),
    ("Goals 🎯", "goals", Choice::EditGoals),
    ("Experience level 📈", "experience", Choice::EditExperience),
    ("Health 🏥", "health", Choice::EditHealth),
    ("Duration ⏱", "duration", Choice::EditDuration),
    ("Done ✅", "done", Choice::Done),
    ("Asana 🧘", "asana", Choice::Practice(PracticeType::Asana)),
    ("Pranayama 🌬️", "pranayama", Choice::Practice(PracticeType::Pranayama)),
    ("Meditation 🧘‍♀️", "meditation", Choice::Practice(PracticeType::Meditation)),
    ("Complex ✨", "complex", Choice::Practice(PracticeType::Complex)),
    ("Finished ✅", "finished", Choice::Finished),
    ("Remind me in 1 hour ⏰", "postpone", Choice::Postpone { hours: 1 }),
    ("Remind me in 3 hours ⏰", "postpone_3h", Choice::Postpone { hours: 3 }),
];

const RATING_LABELS: [&str; 5] = ["⭐", "⭐⭐", "⭐⭐⭐", "⭐⭐⭐⭐", "⭐⭐⭐⭐⭐"];

impl Choice {
    /// Map a button label or stable identifier to a choice.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(choice) = Self::parse_rating(text) {
            return Some(choice);
        }
        let lowered = text.to_lowercase();
        CHOICES
            .iter()
            .find(|(label, id, _)| *label == text || *id == lowered)
            .map(|(_, _, choice)| *choice)
            .or_else(|| ReminderFrequency::parse(&lowered).map(Choice::Frequency))
    }

    fn parse_rating(text: &str) -> Option<Self> {
        let stars = match RATING_LABELS.iter().position(|l| *l == text) {
            Some(index) => u8::try_from(index + 1).ok()?,
            None => text.parse::<u8>().ok()?,
        };
        Rating::new(stars).map(Choice::Rate)
    }

    /// Display label of this choice.
    pub fn label(&self) -> Option<&'static str> {
        if let Choice::Rate(rating) = self {
            return RATING_LABELS.get(usize::from(rating.stars()) - 1).copied();
        }
        CHOICES
            .iter()
            .find(|(_, _, choice)| choice == self)
            .map(|(label, _, _)| *label)
    }
}

fn labels(choices: &[Choice]) -> Vec<String> {
    choices
        .iter()
        .filter_map(Choice::label)
        .map(String::from)
        .collect()
}

fn one_time(rows: Vec<Vec<String>>) -> Keyboard {
    Keyboard::Reply {
        rows,
        one_time: true,
    }
}

fn persistent(rows: &[&[&str]]) -> Keyboard {
    Keyboard::Reply {
        rows: rows
            .iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect(),
        one_time: false,
    }
}

pub fn main_menu() -> Keyboard {
    persistent(&[
        &["Start practice 🧘"],
        &["View progress 📊", "My profile 👤"],
        &["Settings ⚙️", "Help 💡"],
    ])
}

pub fn settings_menu() -> Keyboard {
    persistent(&[
        &["Profile 👤", "Reminders ⏰"],
        &["Language 🌐", "Back 🔙"],
    ])
}

pub fn confirmation_keyboard() -> Keyboard {
    one_time(vec![vec![
        "Yes, let's start! 🚀".to_string(),
        "Change settings ⚙️".to_string(),
    ]])
}

pub fn experience_keyboard() -> Keyboard {
    let levels: Vec<Choice> = ExperienceLevel::ALL.into_iter().map(Choice::Experience).collect();
    one_time(vec![labels(&levels)])
}

pub fn duration_keyboard() -> Keyboard {
    one_time(vec![labels(&[
        Choice::Duration(15),
        Choice::Duration(30),
        Choice::Duration(60),
    ])])
}

pub fn frequency_keyboard() -> Keyboard {
    one_time(vec![
        labels(&[
            Choice::Frequency(ReminderFrequency::Daily),
            Choice::Frequency(ReminderFrequency::EveryOtherDay),
        ]),
        labels(&[
            Choice::Frequency(ReminderFrequency::Weekdays),
            Choice::Frequency(ReminderFrequency::Weekends),
        ]),
        labels(&[Choice::Frequency(ReminderFrequency::Off)]),
    ])
}

pub fn profile_menu() -> Keyboard {
    one_time(vec![
        labels(&[Choice::EditGoals, Choice::EditExperience]),
        labels(&[Choice::EditHealth, Choice::EditDuration]),
        labels(&[Choice::Done]),
    ])
}

pub fn practice_type_keyboard() -> Keyboard {
    let types: Vec<Choice> = PracticeType::ALL.into_iter().map(Choice::Practice).collect();
    one_time(types.chunks(2).map(labels).collect())
}

pub fn completion_keyboard() -> Keyboard {
    one_time(vec![
        labels(&[Choice::Finished]),
        labels(&[Choice::Postpone { hours: 1 }, Choice::Postpone { hours: 3 }]),
    ])
}

pub fn rating_keyboard() -> Keyboard {
    one_time(vec![
        RATING_LABELS[..3].iter().map(|s| s.to_string()).collect(),
        RATING_LABELS[3..].iter().map(|s| s.to_string()).collect(),
    ])
}

pub const INSIGHT_PAYLOAD: &str = "insight";
const PROGRESS_PAYLOAD_PREFIX: &str = "prog_";

pub fn progress_payload(page: u32) -> String {
    format!("{PROGRESS_PAYLOAD_PREFIX}{page}")
}

/// Page number carried by a `prog_{n}` callback payload.
pub fn parse_progress_payload(payload: &str) -> Option<u32> {
    payload
        .strip_prefix(PROGRESS_PAYLOAD_PREFIX)?
        .parse()
        .ok()
        .filter(|page| *page >= 1)
}

/// Pagination and insight buttons under a progress page.
pub fn progress_buttons(page: u32, total_pages: u32) -> Keyboard {
    let mut nav = Vec::new();
    if page > 1 {
        nav.push(InlineButton::new("« Back", progress_payload(page - 1)));
    }
    if page < total_pages {
        nav.push(InlineButton::new("Next »", progress_payload(page + 1)));
    }
    let mut rows = Vec::new();
    if !nav.is_empty() {
        rows.push(nav);
    }
    rows.push(vec![InlineButton::new("💡 Insight", INSIGHT_PAYLOAD)]);
    Keyboard::Inline { rows }
}
