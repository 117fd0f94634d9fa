//! User profiles: who the user is and how they like to practise.

pub mod model;

pub use model::{
    ExperienceLevel, NewUser, ReminderFrequency, ReminderSettings, ReminderTime, UserProfile,
    parse_duration_minutes, parse_health_conditions,
};
