use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, EntryRow, FeedRow};
use crate::feed::{FeedClass, Validators};
use crate::store::{Entry, Feed, FeedStatus, StoreSnapshot};

/// Rows per multi-row INSERT. 9 columns * 50 stays well under SQLite's
/// 999 parameter limit.
const BATCH_SIZE: usize = 50;

fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(
    table: &'static str,
    key: &str,
    value: &str,
) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidRow {
            table,
            key: key.to_string(),
            reason: format!("bad timestamp {value:?}: {e}"),
        })
}

impl Database {
    // ========================================================================
    // Snapshot Operations
    // ========================================================================

    /// Persist every feed and entry of `snapshot` in one transaction.
    ///
    /// Existing rows are updated in place; rows absent from the snapshot
    /// are left alone.
    pub async fn save_snapshot(&self, snapshot: &StoreSnapshot) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        for chunk in snapshot.feeds.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO feeds (url, class, title, last_fetch_at, last_status, last_error, \
                 etag, last_modified, consecutive_failures) ",
            );
            builder.push_values(chunk, |mut b, feed| {
                let validators = feed.validators.as_ref();
                b.push_bind(&feed.url)
                    .push_bind(feed.class.as_str())
                    .push_bind(&feed.title)
                    .push_bind(feed.last_fetch_at.as_ref().map(encode_time))
                    .push_bind(feed.last_status.map(|s| s.as_str()))
                    .push_bind(&feed.last_error)
                    .push_bind(validators.and_then(|v| v.etag.clone()))
                    .push_bind(validators.and_then(|v| v.last_modified.clone()))
                    .push_bind(i64::from(feed.consecutive_failures));
            });
            builder.push(
                " ON CONFLICT(url) DO UPDATE SET \
                 class = excluded.class, \
                 title = excluded.title, \
                 last_fetch_at = excluded.last_fetch_at, \
                 last_status = excluded.last_status, \
                 last_error = excluded.last_error, \
                 etag = excluded.etag, \
                 last_modified = excluded.last_modified, \
                 consecutive_failures = excluded.consecutive_failures",
            );
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        }

        for chunk in snapshot.entries.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO entries (feed_url, identity, title, link, summary, published_at, \
                 published_from_source, first_seen_at) ",
            );
            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(&entry.feed_url)
                    .push_bind(&entry.identity)
                    .push_bind(&entry.title)
                    .push_bind(&entry.link)
                    .push_bind(&entry.summary)
                    .push_bind(encode_time(&entry.published_at))
                    .push_bind(entry.published_from_source)
                    .push_bind(encode_time(&entry.first_seen_at));
            });
            // published_at and first_seen_at never change once stored
            builder.push(
                " ON CONFLICT(feed_url, identity) DO UPDATE SET \
                 title = excluded.title, \
                 link = excluded.link, \
                 summary = excluded.summary",
            );
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        tracing::debug!(
            feeds = snapshot.feeds.len(),
            entries = snapshot.entries.len(),
            "Saved store snapshot"
        );
        Ok(())
    }

    /// Load every stored feed and entry.
    ///
    /// Feeds whose class is no longer recognized are skipped with a warning;
    /// a malformed timestamp is an error.
    pub async fn load_snapshot(&self) -> Result<StoreSnapshot, DatabaseError> {
        let feed_rows: Vec<FeedRow> = sqlx::query_as(
            "SELECT url, class, title, last_fetch_at, last_status, last_error, etag, \
             last_modified, consecutive_failures FROM feeds ORDER BY url",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let entry_rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT feed_url, identity, title, link, summary, published_at, \
             published_from_source, first_seen_at FROM entries",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let mut feeds = Vec::with_capacity(feed_rows.len());
        for row in feed_rows {
            if let Some(feed) = feed_from_row(row)? {
                feeds.push(feed);
            }
        }

        let entries = entry_rows
            .into_iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            feeds = feeds.len(),
            entries = entries.len(),
            "Loaded store snapshot"
        );
        Ok(StoreSnapshot { feeds, entries })
    }
}

fn feed_from_row(row: FeedRow) -> Result<Option<Feed>, DatabaseError> {
    let class: FeedClass = match row.class.parse() {
        Ok(class) => class,
        Err(e) => {
            tracing::warn!(feed = %row.url, error = %e, "Skipping stored feed");
            return Ok(None);
        }
    };

    let last_fetch_at = row
        .last_fetch_at
        .as_deref()
        .map(|t| decode_time("feeds", &row.url, t))
        .transpose()?;

    // Unknown status strings are treated as "never fetched".
    let last_status = row
        .last_status
        .as_deref()
        .and_then(|s| s.parse::<FeedStatus>().ok());

    let validators = Validators {
        etag: row.etag,
        last_modified: row.last_modified,
    };

    Ok(Some(Feed {
        url: row.url,
        class,
        title: row.title,
        last_fetch_at,
        last_status,
        last_error: row.last_error,
        validators: (!validators.is_empty()).then_some(validators),
        consecutive_failures: u32::try_from(row.consecutive_failures).unwrap_or(0),
    }))
}

fn entry_from_row(row: EntryRow) -> Result<Entry, DatabaseError> {
    let published_at = decode_time("entries", &row.identity, &row.published_at)?;
    let first_seen_at = decode_time("entries", &row.identity, &row.first_seen_at)?;
    Ok(Entry {
        identity: row.identity,
        feed_url: row.feed_url,
        title: row.title,
        link: row.link,
        summary: row.summary,
        published_at,
        published_from_source: row.published_from_source,
        first_seen_at,
    })
}
