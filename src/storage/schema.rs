use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

/// File name of the state database inside the state directory.
pub const DATABASE_FILE: &str = "mean-feeder.db";

// ============================================================================
// Database
// ============================================================================

/// SQLite persistence for store snapshots.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `path` may be `:memory:` for a throwaway database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process keeps the
    /// database locked, `DatabaseError::Migration` if the schema cannot be
    /// created, and `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Wait up to 5 seconds for locks before returning SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10));
        if path == ":memory:" {
            // Every in-memory connection is a separate database
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| match DatabaseError::from_sqlx(e) {
                DatabaseError::Other(e) => DatabaseError::Migration(e.to_string()),
                locked => locked,
            })?;

        tracing::debug!(path = %path, "Opened state database");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// Every statement uses `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                url TEXT PRIMARY KEY,
                class TEXT NOT NULL,
                title TEXT,
                last_fetch_at TEXT,
                last_status TEXT,
                last_error TEXT,
                etag TEXT,
                last_modified TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Timestamps are RFC 3339 with nanoseconds, which also sort correctly
        // as text.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                feed_url TEXT NOT NULL,
                identity TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                summary TEXT,
                published_at TEXT NOT NULL,
                published_from_source INTEGER NOT NULL,
                first_seen_at TEXT NOT NULL,
                PRIMARY KEY (feed_url, identity)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_published ON entries(published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
