//! Practice session and progress data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::ExperienceLevel;

/// Kind of practice the user asked for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PracticeType {
    Asana,
    Pranayama,
    Meditation,
    Complex,
}

impl PracticeType {
    pub const ALL: [PracticeType; 4] = [Self::Asana, Self::Pranayama, Self::Meditation, Self::Complex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asana => "asana",
            Self::Pranayama => "pranayama",
            Self::Meditation => "meditation",
            Self::Complex => "complex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "asana" => Some(Self::Asana),
            "pranayama" => Some(Self::Pranayama),
            "meditation" => Some(Self::Meditation),
            "complex" => Some(Self::Complex),
            _ => None,
        }
    }

    /// Human description used when prompting the model.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Asana => "asana (posture) practice",
            Self::Pranayama => "pranayama (breathing) practice",
            Self::Meditation => "guided meditation",
            Self::Complex => "complete practice combining asana, pranayama and meditation",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Asana => "🧘",
            Self::Pranayama => "🌬️",
            Self::Meditation => "🧘‍♀️",
            Self::Complex => "✨",
        }
    }
}

impl std::fmt::Display for PracticeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 1 to 5 star rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rating(u8);

impl Rating {
    pub fn new(stars: u8) -> Option<Self> {
        (1..=5).contains(&stars).then_some(Self(stars))
    }

    pub fn stars(&self) -> u8 {
        self.0
    }

    pub fn as_stars(&self) -> String {
        "⭐".repeat(usize::from(self.0))
    }
}

/// Generated practice payload as stored with the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeContent {
    pub text: String,
    /// Candidate model that produced the text.
    pub model: String,
}

/// One generated practice and its lifecycle.
#[derive(Debug, Clone)]
pub struct PracticeSession {
    pub id: Uuid,
    pub user_id: String,
    pub practice_type: PracticeType,
    /// Requested length in minutes.
    pub duration: u32,
    pub difficulty: Option<ExperienceLevel>,
    pub content: PracticeContent,
    pub personalization_notes: Option<String>,
    pub completed: bool,
    pub rating: Option<Rating>,
    pub feedback: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PracticeSession {
    /// A session that starts now with freshly generated content.
    pub fn started(
        user_id: impl Into<String>,
        practice_type: PracticeType,
        duration: u32,
        difficulty: Option<ExperienceLevel>,
        content: PracticeContent,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            practice_type,
            duration,
            difficulty,
            content,
            personalization_notes: None,
            completed: false,
            rating: None,
            feedback: None,
            scheduled_at: now,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
        }
    }
}

/// Completion details applied to a practice in one commit.
#[derive(Debug, Clone)]
pub struct PracticeCompletion {
    pub rating: Rating,
    pub feedback: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Running per-user aggregate over completed practices.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProgress {
    pub user_id: String,
    pub practices_completed: u32,
    pub total_practice_minutes: u32,
    pub average_rating: Option<f64>,
    pub last_practice_at: Option<DateTime<Utc>>,
}

impl UserProgress {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            practices_completed: 0,
            total_practice_minutes: 0,
            average_rating: None,
            last_practice_at: None,
        }
    }

    /// Fold one completed practice into the aggregate.
    pub fn record(&mut self, duration: u32, rating: Rating, at: DateTime<Utc>) {
        let previous = self.practices_completed;
        let prior_sum = self.average_rating.unwrap_or(0.0) * f64::from(previous);
        self.practices_completed = previous + 1;
        self.total_practice_minutes += duration;
        self.average_rating =
            Some((prior_sum + f64::from(rating.stars())) / f64::from(self.practices_completed));
        self.last_practice_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds() {
        assert!(Rating::new(0).is_none());
        assert!(Rating::new(6).is_none());
        assert_eq!(Rating::new(4).unwrap().as_stars(), "⭐⭐⭐⭐");
    }

    #[test]
    fn practice_type_parse_matches_as_str() {
        for t in PracticeType::ALL {
            assert_eq!(PracticeType::parse(t.as_str()), Some(t));
        }
        assert_eq!(PracticeType::parse("pilates"), None);
    }

    #[test]
    fn progress_running_average() {
        let mut progress = UserProgress::empty("7");
        let now = Utc::now();
        progress.record(15, Rating::new(5).unwrap(), now);
        progress.record(30, Rating::new(3).unwrap(), now);
        assert_eq!(progress.practices_completed, 2);
        assert_eq!(progress.total_practice_minutes, 45);
        assert_eq!(progress.average_rating, Some(4.0));
        assert_eq!(progress.last_practice_at, Some(now));
    }

    #[test]
    fn started_session_is_open() {
        let content = PracticeContent {
            text: "Sun salutation".into(),
            model: "m".into(),
        };
        let session = PracticeSession::started("7", PracticeType::Asana, 15, None, content);
        assert!(!session.completed);
        assert!(session.started_at.is_some());
        assert!(session.rating.is_none());
    }
}
