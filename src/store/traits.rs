//! `Database` trait: single async interface for all persistence.
//!
//! Every method is one scoped session: it acquires the connection, reads or
//! mutates, commits (or rolls back), and releases before returning.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::practice::{PracticeCompletion, PracticeSession, UserProgress};
use crate::profile::{NewUser, UserProfile};

/// Backend-agnostic store for users, practices and progress.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError>;

    /// Insert the user if unseen, then return the stored profile.
    async fn create_user(&self, user: &NewUser) -> Result<UserProfile, DatabaseError>;

    /// Write every mutable profile field in one commit.
    async fn save_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError>;

    /// Stamp the user's last activity.
    async fn touch_user(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// Users with notifications on and both reminder fields set.
    async fn list_reminder_users(&self) -> Result<Vec<UserProfile>, DatabaseError>;

    // ── Practices ───────────────────────────────────────────────────

    async fn insert_practice(&self, practice: &PracticeSession) -> Result<(), DatabaseError>;

    async fn get_practice(&self, id: Uuid) -> Result<Option<PracticeSession>, DatabaseError>;

    /// Most recently created practice the user has not completed.
    async fn latest_open_practice(
        &self,
        user_id: &str,
    ) -> Result<Option<PracticeSession>, DatabaseError>;

    /// Mark a practice completed and fold it into the user's progress,
    /// all in one transaction. Completing an already completed practice is
    /// rejected.
    async fn complete_practice(
        &self,
        id: Uuid,
        completion: &PracticeCompletion,
    ) -> Result<PracticeSession, DatabaseError>;

    /// Backfill the feedback text of a completed practice.
    async fn set_practice_feedback(&self, id: Uuid, feedback: &str) -> Result<(), DatabaseError>;

    async fn count_completed_practices(&self, user_id: &str) -> Result<u32, DatabaseError>;

    /// Completed practices, newest completion first.
    async fn list_completed_practices(
        &self,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<PracticeSession>, DatabaseError>;

    // ── Progress ────────────────────────────────────────────────────

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>, DatabaseError>;
}
