//! libSQL backend: async `Database` trait implementation.
//!
//! One connection guarded by an async mutex. Each trait method holds the
//! guard for exactly one logical operation, so a multi-statement operation
//! runs inside its own transaction and nothing leaks across requests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::practice::{
    PracticeCompletion, PracticeContent, PracticeSession, PracticeType, Rating, UserProgress,
};
use crate::profile::{
    ExperienceLevel, NewUser, ReminderFrequency, ReminderSettings, ReminderTime, UserProfile,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection for one scoped session.
    async fn session(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

fn opt_real(n: Option<f64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Real(n),
        None => libsql::Value::Null,
    }
}

fn bool_int(b: bool) -> i64 {
    i64::from(b)
}

fn query_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

const USER_COLUMNS: &str = "user_id, username, first_name, last_name, goals, experience_level, \
     health_conditions, available_duration, current_state, notifications_enabled, reminder_time, \
     reminder_frequency, language, created_at, last_active, is_active";

const PRACTICE_COLUMNS: &str = "id, user_id, practice_type, duration, difficulty, content, \
     personalization_notes, completed, rating, feedback, scheduled_at, started_at, completed_at, \
     created_at";

fn row_to_user(row: &libsql::Row) -> Result<UserProfile, DatabaseError> {
    let map = query_err("row_to_user");

    let health_str: String = row.get::<String>(6).unwrap_or_else(|_| "[]".into());
    let health_conditions: Vec<String> = serde_json::from_str(&health_str)
        .map_err(|e| DatabaseError::Serialization(format!("health_conditions: {e}")))?;

    let reminder_time: Option<String> = row.get::<String>(10).ok();
    let reminder_frequency: Option<String> = row.get::<String>(11).ok();
    let reminder = match (reminder_time, reminder_frequency) {
        (Some(time), Some(freq)) => {
            let frequency = ReminderFrequency::from_stored(&freq);
            match ReminderTime::parse(&time) {
                Ok(time) if frequency != ReminderFrequency::Off => {
                    Some(ReminderSettings { frequency, time })
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(value = %time, "Ignoring unparsable stored reminder time: {e}");
                    None
                }
            }
        }
        _ => None,
    };

    let created_str: String = row.get(13).map_err(&map)?;
    let active_str: String = row.get(14).map_err(&map)?;

    Ok(UserProfile {
        user_id: row.get(0).map_err(&map)?,
        username: row.get::<String>(1).ok(),
        first_name: row.get::<String>(2).ok(),
        last_name: row.get::<String>(3).ok(),
        goals: row.get::<String>(4).ok(),
        experience_level: row
            .get::<String>(5)
            .ok()
            .and_then(|s| ExperienceLevel::parse(&s)),
        health_conditions,
        available_duration: row
            .get::<i64>(7)
            .ok()
            .and_then(|d| u32::try_from(d).ok()),
        current_state: row
            .get::<String>(8)
            .unwrap_or_else(|_| UserProfile::STATE_START.into()),
        notifications_enabled: row.get::<i64>(9).unwrap_or(1) != 0,
        reminder,
        language: row.get::<String>(12).unwrap_or_else(|_| "uk".into()),
        created_at: parse_datetime(&created_str),
        last_active: parse_datetime(&active_str),
        is_active: row.get::<i64>(15).unwrap_or(1) != 0,
    })
}

fn row_to_practice(row: &libsql::Row) -> Result<PracticeSession, DatabaseError> {
    let map = query_err("row_to_practice");

    let id_str: String = row.get(0).map_err(&map)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("practice id {id_str}: {e}")))?;

    let type_str: String = row.get(2).map_err(&map)?;
    let practice_type = PracticeType::parse(&type_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("unknown practice type {type_str}")))?;

    let content_str: String = row.get(5).map_err(&map)?;
    let content: PracticeContent = serde_json::from_str(&content_str)
        .map_err(|e| DatabaseError::Serialization(format!("practice content: {e}")))?;

    let scheduled_str: String = row.get(10).map_err(&map)?;
    let created_str: String = row.get(13).map_err(&map)?;

    Ok(PracticeSession {
        id,
        user_id: row.get(1).map_err(&map)?,
        practice_type,
        duration: u32::try_from(row.get::<i64>(3).map_err(&map)?).unwrap_or(0),
        difficulty: row
            .get::<String>(4)
            .ok()
            .and_then(|s| ExperienceLevel::parse(&s)),
        content,
        personalization_notes: row.get::<String>(6).ok(),
        completed: row.get::<i64>(7).unwrap_or(0) != 0,
        rating: row
            .get::<i64>(8)
            .ok()
            .and_then(|r| u8::try_from(r).ok())
            .and_then(Rating::new),
        feedback: row.get::<String>(9).ok(),
        scheduled_at: parse_datetime(&scheduled_str),
        started_at: parse_optional_datetime(&row.get::<String>(11).ok()),
        completed_at: parse_optional_datetime(&row.get::<String>(12).ok()),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_progress(row: &libsql::Row) -> Result<UserProgress, DatabaseError> {
    let map = query_err("row_to_progress");
    Ok(UserProgress {
        user_id: row.get(0).map_err(&map)?,
        practices_completed: u32::try_from(row.get::<i64>(1).unwrap_or(0)).unwrap_or(0),
        total_practice_minutes: u32::try_from(row.get::<i64>(2).unwrap_or(0)).unwrap_or(0),
        average_rating: row.get::<f64>(3).ok(),
        last_practice_at: parse_optional_datetime(&row.get::<String>(4).ok()),
    })
}

async fn fetch_user(conn: &Connection, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            params![user_id],
        )
        .await
        .map_err(query_err("get_user"))?;

    match rows.next().await.map_err(query_err("get_user"))? {
        Some(row) => Ok(Some(row_to_user(&row)?)),
        None => Ok(None),
    }
}

async fn fetch_practice(conn: &Connection, id: Uuid) -> Result<Option<PracticeSession>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {PRACTICE_COLUMNS} FROM practices WHERE id = ?1"),
            params![id.to_string()],
        )
        .await
        .map_err(query_err("get_practice"))?;

    match rows.next().await.map_err(query_err("get_practice"))? {
        Some(row) => Ok(Some(row_to_practice(&row)?)),
        None => Ok(None),
    }
}

async fn fetch_progress(conn: &Connection, user_id: &str) -> Result<Option<UserProgress>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT user_id, practices_completed, total_practice_minutes, average_rating, \
             last_practice_at FROM user_progress WHERE user_id = ?1",
            params![user_id],
        )
        .await
        .map_err(query_err("get_progress"))?;

    match rows.next().await.map_err(query_err("get_progress"))? {
        Some(row) => Ok(Some(row_to_progress(&row)?)),
        None => Ok(None),
    }
}

/// Body of `complete_practice`, run inside an open transaction.
async fn complete_in_tx(
    conn: &Connection,
    id: Uuid,
    completion: &PracticeCompletion,
) -> Result<PracticeSession, DatabaseError> {
    let mut practice = fetch_practice(conn, id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "practice".into(),
            id: id.to_string(),
        })?;

    if practice.completed {
        return Err(DatabaseError::Query(format!(
            "complete_practice: practice {id} is already completed"
        )));
    }

    conn.execute(
        "UPDATE practices SET completed = 1, rating = ?2, feedback = ?3, completed_at = ?4 \
         WHERE id = ?1",
        params![
            id.to_string(),
            i64::from(completion.rating.stars()),
            opt_text(completion.feedback.as_deref()),
            completion.completed_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(query_err("complete_practice"))?;

    let mut progress = fetch_progress(conn, &practice.user_id)
        .await?
        .unwrap_or_else(|| UserProgress::empty(practice.user_id.clone()));
    progress.record(practice.duration, completion.rating, completion.completed_at);

    conn.execute(
        "INSERT INTO user_progress (user_id, practices_completed, total_practice_minutes, \
             average_rating, last_practice_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
             practices_completed = excluded.practices_completed,
             total_practice_minutes = excluded.total_practice_minutes,
             average_rating = excluded.average_rating,
             last_practice_at = excluded.last_practice_at,
             updated_at = excluded.updated_at",
        params![
            progress.user_id.clone(),
            i64::from(progress.practices_completed),
            i64::from(progress.total_practice_minutes),
            opt_real(progress.average_rating),
            opt_text(progress.last_practice_at.map(|t| t.to_rfc3339()).as_deref()),
            Utc::now().to_rfc3339(),
        ],
    )
    .await
    .map_err(query_err("complete_practice progress"))?;

    practice.completed = true;
    practice.rating = Some(completion.rating);
    practice.feedback = completion.feedback.clone();
    practice.completed_at = Some(completion.completed_at);
    Ok(practice)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.session().await;
        migrations::run_migrations(&conn).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        let conn = self.session().await;
        fetch_user(&conn, user_id).await
    }

    async fn create_user(&self, user: &NewUser) -> Result<UserProfile, DatabaseError> {
        let conn = self.session().await;
        let fresh = UserProfile::new(user);
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO users (user_id, username, first_name, last_name, \
                     current_state, notifications_enabled, language, created_at, last_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    fresh.user_id.clone(),
                    opt_text(fresh.username.as_deref()),
                    opt_text(fresh.first_name.as_deref()),
                    opt_text(fresh.last_name.as_deref()),
                    fresh.current_state.clone(),
                    bool_int(fresh.notifications_enabled),
                    fresh.language.clone(),
                    fresh.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("create_user"))?;

        if inserted > 0 {
            debug!(user_id = %user.user_id, "Created user");
        }

        fetch_user(&conn, &user.user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "user".into(),
                id: user.user_id.clone(),
            })
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        let conn = self.session().await;
        let health = serde_json::to_string(&profile.health_conditions)
            .map_err(|e| DatabaseError::Serialization(format!("health_conditions: {e}")))?;
        let (reminder_time, reminder_frequency) = match profile.reminder {
            Some(r) => (Some(r.time.to_string()), Some(r.frequency.as_str())),
            None => (None, None),
        };

        let updated = conn
            .execute(
                "UPDATE users SET username = ?2, first_name = ?3, last_name = ?4, goals = ?5, \
                     experience_level = ?6, health_conditions = ?7, available_duration = ?8, \
                     current_state = ?9, notifications_enabled = ?10, reminder_time = ?11, \
                     reminder_frequency = ?12, language = ?13, last_active = ?14, is_active = ?15
                 WHERE user_id = ?1",
                params![
                    profile.user_id.clone(),
                    opt_text(profile.username.as_deref()),
                    opt_text(profile.first_name.as_deref()),
                    opt_text(profile.last_name.as_deref()),
                    opt_text(profile.goals.as_deref()),
                    opt_text(profile.experience_level.map(|e| e.as_str())),
                    health,
                    opt_int(profile.available_duration.map(i64::from)),
                    profile.current_state.clone(),
                    bool_int(profile.notifications_enabled),
                    opt_text(reminder_time.as_deref()),
                    opt_text(reminder_frequency),
                    profile.language.clone(),
                    Utc::now().to_rfc3339(),
                    bool_int(profile.is_active),
                ],
            )
            .await
            .map_err(query_err("save_profile"))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: profile.user_id.clone(),
            });
        }
        Ok(())
    }

    async fn touch_user(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let conn = self.session().await;
        conn.execute(
            "UPDATE users SET last_active = ?2 WHERE user_id = ?1",
            params![user_id, at.to_rfc3339()],
        )
        .await
        .map_err(query_err("touch_user"))?;
        Ok(())
    }

    async fn list_reminder_users(&self) -> Result<Vec<UserProfile>, DatabaseError> {
        let conn = self.session().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE notifications_enabled = 1 AND is_active = 1
                       AND reminder_time IS NOT NULL
                       AND reminder_frequency IS NOT NULL
                       AND reminder_frequency != 'off'
                     ORDER BY user_id"
                ),
                (),
            )
            .await
            .map_err(query_err("list_reminder_users"))?;

        let mut users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_user(&row) {
                Ok(user) => users.push(user),
                Err(e) => warn!("Skipping unreadable user row: {e}"),
            }
        }
        Ok(users)
    }

    async fn insert_practice(&self, practice: &PracticeSession) -> Result<(), DatabaseError> {
        let conn = self.session().await;
        let content = serde_json::to_string(&practice.content)
            .map_err(|e| DatabaseError::Serialization(format!("practice content: {e}")))?;

        conn.execute(
            &format!(
                "INSERT INTO practices ({PRACTICE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                practice.id.to_string(),
                practice.user_id.clone(),
                practice.practice_type.as_str(),
                i64::from(practice.duration),
                opt_text(practice.difficulty.map(|d| d.as_str())),
                content,
                opt_text(practice.personalization_notes.as_deref()),
                bool_int(practice.completed),
                opt_int(practice.rating.map(|r| i64::from(r.stars()))),
                opt_text(practice.feedback.as_deref()),
                practice.scheduled_at.to_rfc3339(),
                opt_text(practice.started_at.map(|t| t.to_rfc3339()).as_deref()),
                opt_text(practice.completed_at.map(|t| t.to_rfc3339()).as_deref()),
                practice.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(query_err("insert_practice"))?;

        debug!(practice_id = %practice.id, user_id = %practice.user_id, "Inserted practice");
        Ok(())
    }

    async fn get_practice(&self, id: Uuid) -> Result<Option<PracticeSession>, DatabaseError> {
        let conn = self.session().await;
        fetch_practice(&conn, id).await
    }

    async fn latest_open_practice(
        &self,
        user_id: &str,
    ) -> Result<Option<PracticeSession>, DatabaseError> {
        let conn = self.session().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PRACTICE_COLUMNS} FROM practices
                     WHERE user_id = ?1 AND completed = 0
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![user_id],
            )
            .await
            .map_err(query_err("latest_open_practice"))?;

        match rows.next().await.map_err(query_err("latest_open_practice"))? {
            Some(row) => Ok(Some(row_to_practice(&row)?)),
            None => Ok(None),
        }
    }

    async fn complete_practice(
        &self,
        id: Uuid,
        completion: &PracticeCompletion,
    ) -> Result<PracticeSession, DatabaseError> {
        let conn = self.session().await;
        let tx = conn
            .transaction()
            .await
            .map_err(query_err("complete_practice begin"))?;

        match complete_in_tx(&tx, id, completion).await {
            Ok(practice) => {
                tx.commit()
                    .await
                    .map_err(query_err("complete_practice commit"))?;
                Ok(practice)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(practice_id = %id, "Rollback failed: {rb}");
                }
                Err(e)
            }
        }
    }

    async fn set_practice_feedback(&self, id: Uuid, feedback: &str) -> Result<(), DatabaseError> {
        let conn = self.session().await;
        let updated = conn
            .execute(
                "UPDATE practices SET feedback = ?2 WHERE id = ?1",
                params![id.to_string(), feedback],
            )
            .await
            .map_err(query_err("set_practice_feedback"))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "practice".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn count_completed_practices(&self, user_id: &str) -> Result<u32, DatabaseError> {
        let conn = self.session().await;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM practices WHERE user_id = ?1 AND completed = 1",
                params![user_id],
            )
            .await
            .map_err(query_err("count_completed_practices"))?;

        match rows
            .next()
            .await
            .map_err(query_err("count_completed_practices"))?
        {
            Some(row) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(u32::try_from(count).unwrap_or(u32::MAX))
            }
            None => Ok(0),
        }
    }

    async fn list_completed_practices(
        &self,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<PracticeSession>, DatabaseError> {
        let conn = self.session().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PRACTICE_COLUMNS} FROM practices
                     WHERE user_id = ?1 AND completed = 1
                     ORDER BY completed_at DESC
                     LIMIT ?2 OFFSET ?3"
                ),
                params![user_id, i64::from(limit), i64::from(offset)],
            )
            .await
            .map_err(query_err("list_completed_practices"))?;

        let mut practices = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            practices.push(row_to_practice(&row)?);
        }
        Ok(practices)
    }

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>, DatabaseError> {
        let conn = self.session().await;
        fetch_progress(&conn, user_id).await
    }
}
