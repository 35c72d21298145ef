use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with operator-facing messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of mean-feeder appears to be using the state database.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored row could not be decoded back into store types
    #[error("Invalid {table} row {key}: {reason}")]
    InvalidRow {
        table: &'static str,
        key: String,
        reason: String,
    },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Maps SQLITE_BUSY/SQLITE_LOCKED to [`DatabaseError::InstanceLocked`]
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let locked = match &err {
            sqlx::Error::Database(db) => {
                // Extended codes keep the primary code in the low byte
                let primary = db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                matches!(primary, Some(5 | 6))
                    || db.message().contains("database is locked")
            }
            _ => false,
        };
        if locked {
            DatabaseError::InstanceLocked
        } else {
            DatabaseError::Other(err)
        }
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub url: String,
    pub class: String,
    pub title: Option<String>,
    pub last_fetch_at: Option<String>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub consecutive_failures: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub feed_url: String,
    pub identity: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub published_at: String,
    pub published_from_source: bool,
    pub first_seen_at: String,
}
