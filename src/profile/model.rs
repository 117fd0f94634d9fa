//! User profile data model.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{MAX_PRACTICE_MINUTES, MIN_PRACTICE_MINUTES};
use crate::error::SchedulerError;

/// `H:M` or `HH:MM`; range checks happen after the match.
static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2}):(\d{1,2})\s*$").expect("time pattern is a valid regex")
});

/// Words that mean "no health conditions".
const NO_CONDITIONS: &[&str] = &["none", "no", "nothing", "немає", "ні", "нема"];

/// Self-reported yoga experience.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl ExperienceLevel {
    pub const ALL: [ExperienceLevel; 3] = [Self::Beginner, Self::Intermediate, Self::Advanced];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often the regular reminder fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderFrequency {
    Off,
    Daily,
    EveryOtherDay,
    Weekdays,
    Weekends,
}

impl ReminderFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Daily => "daily",
            Self::EveryOtherDay => "every_other_day",
            Self::Weekdays => "weekdays",
            Self::Weekends => "weekends",
        }
    }

    /// Strict parse of a stable identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "disable" | "disabled" => Some(Self::Off),
            "daily" => Some(Self::Daily),
            "every_other_day" | "everyotherday" | "every-other-day" => Some(Self::EveryOtherDay),
            "weekdays" => Some(Self::Weekdays),
            "weekends" => Some(Self::Weekends),
            _ => None,
        }
    }

    /// Parse a persisted value. Anything unrecognized is treated as daily.
    pub fn from_stored(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(value = %s, "Unrecognized reminder frequency; defaulting to daily");
            Self::Daily
        })
    }
}

impl std::fmt::Display for ReminderFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time of day for a reminder, in the configured reference time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReminderTime {
    hour: u32,
    minute: u32,
}

impl ReminderTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        if hour > 23 || minute > 59 {
            return Err(SchedulerError::InvalidTime(format!("{hour}:{minute}")));
        }
        Ok(Self { hour, minute })
    }

    /// Parse user input such as `08:30` or `0:5`.
    pub fn parse(input: &str) -> Result<Self, SchedulerError> {
        let caps = TIME_PATTERN
            .captures(input)
            .ok_or_else(|| SchedulerError::InvalidTime(input.trim().to_string()))?;
        let hour = caps[1]
            .parse()
            .map_err(|_| SchedulerError::InvalidTime(input.trim().to_string()))?;
        let minute = caps[2]
            .parse()
            .map_err(|_| SchedulerError::InvalidTime(input.trim().to_string()))?;
        Self::new(hour, minute)
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }
}

impl std::fmt::Display for ReminderTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Frequency and time of a regular reminder. Present only when reminders
/// are actually configured, so the two fields are always set together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSettings {
    pub frequency: ReminderFrequency,
    pub time: ReminderTime,
}

/// Identity details captured on first contact.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub user_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl NewUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// A bot user and everything onboarding collected about them.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub goals: Option<String>,
    pub experience_level: Option<ExperienceLevel>,
    pub health_conditions: Vec<String>,
    /// Preferred practice length in minutes.
    pub available_duration: Option<u32>,
    /// Coarse lifecycle tag: `start`, `onboarding` or `active`.
    pub current_state: String,
    pub notifications_enabled: bool,
    pub reminder: Option<ReminderSettings>,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub is_active: bool,
}

impl UserProfile {
    pub const STATE_START: &'static str = "start";
    pub const STATE_ONBOARDING: &'static str = "onboarding";
    pub const STATE_ACTIVE: &'static str = "active";

    /// A fresh profile for a first-contact user.
    pub fn new(user: &NewUser) -> Self {
        let now = Utc::now();
        Self {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            goals: None,
            experience_level: None,
            health_conditions: Vec::new(),
            available_duration: None,
            current_state: Self::STATE_START.to_string(),
            notifications_enabled: true,
            reminder: None,
            language: "uk".to_string(),
            created_at: now,
            last_active: now,
            is_active: true,
        }
    }

    /// Onboarding counts as done once the fields practice generation needs
    /// are all present.
    pub fn is_onboarded(&self) -> bool {
        self.goals.is_some() && self.experience_level.is_some() && self.available_duration.is_some()
    }

    pub fn reminder_frequency(&self) -> ReminderFrequency {
        self.reminder.map_or(ReminderFrequency::Off, |r| r.frequency)
    }

    /// Turn reminders on at `time`, or off entirely when `frequency` is `Off`.
    pub fn set_reminder(&mut self, frequency: ReminderFrequency, time: Option<ReminderTime>) {
        match (frequency, time) {
            (ReminderFrequency::Off, _) | (_, None) => self.clear_reminder(),
            (frequency, Some(time)) => {
                self.reminder = Some(ReminderSettings { frequency, time });
                self.notifications_enabled = true;
            }
        }
    }

    pub fn clear_reminder(&mut self) {
        self.reminder = None;
        self.notifications_enabled = false;
    }

    /// Whether the scheduler should hold a regular job for this user.
    pub fn wants_reminders(&self) -> bool {
        self.notifications_enabled && self.reminder.is_some()
    }

    /// Name to greet the user with.
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("friend")
    }
}

/// Interpret a health answer. "none"-like answers mean no conditions.
pub fn parse_health_conditions(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || NO_CONDITIONS.contains(&trimmed.to_lowercase().as_str()) {
        Vec::new()
    } else {
        vec![trimmed.to_string()]
    }
}

/// Accept a practice length typed as a plain number of minutes.
pub fn parse_duration_minutes(input: &str) -> Option<u32> {
    let minutes: u32 = input.trim().trim_end_matches("min").trim().parse().ok()?;
    (MIN_PRACTICE_MINUTES..=MAX_PRACTICE_MINUTES)
        .contains(&minutes)
        .then_some(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_accepts_padded_and_short_forms() {
        assert_eq!(ReminderTime::parse("08:30").unwrap().to_string(), "08:30");
        assert_eq!(ReminderTime::parse("0:5").unwrap().to_string(), "00:05");
        assert_eq!(ReminderTime::parse(" 23:59 ").unwrap().to_string(), "23:59");
    }

    #[test]
    fn time_rejects_out_of_range_and_garbage() {
        for input in ["25:00", "08:60", "abc", "", "8", "08:30:00", "-1:00", "123:00"] {
            assert!(ReminderTime::parse(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn frequency_round_trips_through_storage() {
        for freq in [
            ReminderFrequency::Off,
            ReminderFrequency::Daily,
            ReminderFrequency::EveryOtherDay,
            ReminderFrequency::Weekdays,
            ReminderFrequency::Weekends,
        ] {
            assert_eq!(ReminderFrequency::from_stored(freq.as_str()), freq);
        }
    }

    #[test]
    fn unknown_stored_frequency_defaults_to_daily() {
        assert_eq!(ReminderFrequency::from_stored("fortnightly"), ReminderFrequency::Daily);
        assert_eq!(ReminderFrequency::parse("fortnightly"), None);
    }

    #[test]
    fn reminder_fields_set_and_cleared_together() {
        let mut profile = UserProfile::new(&NewUser::new("42"));
        let time = ReminderTime::new(7, 15).unwrap();

        profile.set_reminder(ReminderFrequency::Weekdays, Some(time));
        assert!(profile.wants_reminders());
        assert_eq!(profile.reminder_frequency(), ReminderFrequency::Weekdays);

        profile.set_reminder(ReminderFrequency::Off, Some(time));
        assert!(profile.reminder.is_none());
        assert!(!profile.notifications_enabled);
        assert_eq!(profile.reminder_frequency(), ReminderFrequency::Off);

        profile.set_reminder(ReminderFrequency::Daily, None);
        assert!(profile.reminder.is_none());
    }

    #[test]
    fn onboarded_requires_goals_experience_and_duration() {
        let mut profile = UserProfile::new(&NewUser::new("42"));
        assert!(!profile.is_onboarded());
        profile.goals = Some("flexibility".into());
        profile.experience_level = Some(ExperienceLevel::Beginner);
        assert!(!profile.is_onboarded());
        profile.available_duration = Some(15);
        assert!(profile.is_onboarded());
    }

    #[test]
    fn health_none_words_mean_empty() {
        assert!(parse_health_conditions("none").is_empty());
        assert!(parse_health_conditions("No").is_empty());
        assert!(parse_health_conditions("немає").is_empty());
        assert_eq!(parse_health_conditions(" lower back pain "), vec!["lower back pain"]);
    }

    #[test]
    fn duration_numbers_within_bounds() {
        assert_eq!(parse_duration_minutes("20"), Some(20));
        assert_eq!(parse_duration_minutes("45 min"), Some(45));
        assert_eq!(parse_duration_minutes("4"), None);
        assert_eq!(parse_duration_minutes("90"), None);
        assert_eq!(parse_duration_minutes("soon"), None);
    }
}
