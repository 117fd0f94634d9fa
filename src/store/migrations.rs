//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` reads
//! the highest applied version from `_migrations` and applies the newer
//! ones in order.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users_and_practices",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                goals TEXT,
                experience_level TEXT,
                health_conditions TEXT NOT NULL DEFAULT '[]',
                available_duration INTEGER,
                current_state TEXT NOT NULL DEFAULT 'start',
                notifications_enabled INTEGER NOT NULL DEFAULT 1,
                reminder_time TEXT,
                reminder_frequency TEXT,
                language TEXT NOT NULL DEFAULT 'uk',
                created_at TEXT NOT NULL,
                last_active TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_users_reminders
                ON users(notifications_enabled, reminder_time, reminder_frequency);

            CREATE TABLE IF NOT EXISTS practices (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                practice_type TEXT NOT NULL,
                duration INTEGER NOT NULL,
                difficulty TEXT,
                content TEXT NOT NULL,
                personalization_notes TEXT,
                completed INTEGER NOT NULL DEFAULT 0,
                rating INTEGER,
                feedback TEXT,
                scheduled_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_practices_user ON practices(user_id);
            CREATE INDEX IF NOT EXISTS idx_practices_user_completed
                ON practices(user_id, completed, completed_at);
        "#,
    },
    Migration {
        version: 2,
        name: "user_progress",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_progress (
                user_id TEXT PRIMARY KEY REFERENCES users(user_id),
                practices_completed INTEGER NOT NULL DEFAULT 0,
                total_practice_minutes INTEGER NOT NULL DEFAULT 0,
                average_rating REAL,
                last_practice_at TEXT,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let final_version = get_current_version(conn).await?;
    tracing::info!(version = final_version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["users", "practices", "user_progress", "_migrations"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[tokio::test]
    async fn partially_migrated_db_gets_remaining_versions() {
        let conn = test_conn().await;
        conn.execute(
            "CREATE TABLE _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            (),
        )
        .await
        .unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).await.unwrap();
        seed_version(&conn, 1, MIGRATIONS[0].name).await.unwrap();

        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='user_progress'",
                (),
            )
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_current_version(&conn).await.unwrap(), 2);
    }
}
