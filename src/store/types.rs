use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::feed::{FeedClass, Validators};

// ============================================================================
// Error Types
// ============================================================================

/// Errors from store mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The URL is not part of this process's registry.
    #[error("Unknown feed: {0}")]
    UnknownFeed(String),
}

// ============================================================================
// Feeds
// ============================================================================

/// Result of the most recent fetch attempt for a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Ok,
    TransientError,
    PermanentError,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Ok => "ok",
            FeedStatus::TransientError => "transient_error",
            FeedStatus::PermanentError => "permanent_error",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(FeedStatus::Ok),
            "transient_error" => Ok(FeedStatus::TransientError),
            "permanent_error" => Ok(FeedStatus::PermanentError),
            other => Err(format!("unknown feed status: {other}")),
        }
    }
}

/// A registered feed and the outcome of its latest refresh.
///
/// `url` and `class` come from the registry and never change; every other
/// field is written only by the scheduler after a fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub url: String,
    pub class: FeedClass,
    /// Document title from the last successful parse
    pub title: Option<String>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// `None` until the first attempt
    pub last_status: Option<FeedStatus>,
    pub last_error: Option<String>,
    /// Validators from the last fetch that was parsed successfully
    pub validators: Option<Validators>,
    /// Failed attempts since the last success (observability only)
    pub consecutive_failures: u32,
}

impl Feed {
    pub fn new(url: impl Into<String>, class: FeedClass) -> Self {
        Self {
            url: url.into(),
            class,
            title: None,
            last_fetch_at: None,
            last_status: None,
            last_error: None,
            validators: None,
            consecutive_failures: 0,
        }
    }

    /// Title to show next to entries, falling back to the URL.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

// ============================================================================
// Entries
// ============================================================================

/// A deduplicated item published by a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable key within the feed: guid/id, or a hash of link and title
    pub identity: String,
    pub feed_url: String,
    pub title: String,
    /// Empty when the item carried no link
    pub link: String,
    pub summary: Option<String>,
    /// Source date, or first-observed time when the source had none
    pub published_at: DateTime<Utc>,
    /// `false` when `published_at` is the first-observed fallback
    pub published_from_source: bool,
    pub first_seen_at: DateTime<Utc>,
}

/// Counts reported by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeStats {
    pub fn total(&self) -> usize {
        self.new + self.updated + self.unchanged
    }
}

impl std::ops::AddAssign for MergeStats {
    fn add_assign(&mut self, rhs: Self) {
        self.new += rhs.new;
        self.updated += rhs.updated;
        self.unchanged += rhs.unchanged;
    }
}

/// Serializable copy of the whole store, used for persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub feeds: Vec<Feed>,
    pub entries: Vec<Entry>,
}
