//! HTTP handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::feed::FeedClass;
use crate::scheduler::{Phase, Scheduler};
use crate::store::{Entry, FeedStatus, QueryService};
use crate::web::error::ApiError;

/// Shared state for all handlers.
pub struct AppState {
    pub query: QueryService,
    /// Present when a scheduler runs in this process; used for `/health`.
    pub scheduler: Option<Arc<Scheduler>>,
}

impl AppState {
    pub fn new(query: QueryService) -> Self {
        Self {
            query,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

/// Raw paging parameters. Parsed by hand so malformed numbers get the same
/// JSON error body as out-of-range ones.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn parse_param(name: &str, value: Option<&str>) -> Result<Option<i64>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("Invalid {name}: {v:?}"))),
    }
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    #[serde(flatten)]
    pub entry: Entry,
    /// Title of the owning feed, or its URL
    pub feed_title: String,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub entries: Vec<EntryResponse>,
    pub page: u64,
    pub page_size: usize,
    pub total: usize,
    pub has_more: bool,
}

/// GET /api/entries/:class - One page of a partition, newest first.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(class): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<PageResponse>, ApiError> {
    let page_number = parse_param("page", params.page.as_deref())?.unwrap_or(1);
    let page_size = parse_param("page_size", params.page_size.as_deref())?;

    let page = state.query.page_named(&class, page_number, page_size)?;

    let titles: HashMap<String, String> = state
        .query
        .store()
        .feeds()
        .into_iter()
        .map(|feed| {
            let title = feed.display_title().to_string();
            (feed.url, title)
        })
        .collect();

    let entries = page
        .entries
        .into_iter()
        .map(|entry| {
            let feed_title = titles
                .get(&entry.feed_url)
                .cloned()
                .unwrap_or_else(|| entry.feed_url.clone());
            EntryResponse { entry, feed_title }
        })
        .collect();

    Ok(Json(PageResponse {
        entries,
        page: page.page,
        page_size: page.page_size,
        total: page.total,
        has_more: page.has_more,
    }))
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub url: String,
    pub class: FeedClass,
    pub title: Option<String>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_status: Option<FeedStatus>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub entries: usize,
}

/// GET /api/feeds - Status of every registered feed.
pub async fn list_feeds(State(state): State<Arc<AppState>>) -> Json<Vec<FeedResponse>> {
    let store = state.query.store();
    let counts = store.entry_counts();

    let feeds = store
        .feeds()
        .into_iter()
        .map(|feed| FeedResponse {
            entries: counts.get(&feed.url).copied().unwrap_or(0),
            url: feed.url,
            class: feed.class,
            title: feed.title,
            last_fetch_at: feed.last_fetch_at,
            last_status: feed.last_status,
            last_error: feed.last_error,
            consecutive_failures: feed.consecutive_failures,
        })
        .collect();

    Json(feeds)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub entries: usize,
    pub feeds: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

/// GET /health - Liveness plus a few store counters.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.query.store();
    Json(HealthResponse {
        status: "ok",
        entries: store.len(),
        feeds: store.feeds().len(),
        phase: state.scheduler.as_ref().map(|s| s.phase()),
    })
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::not_found("No such route")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("page", None).unwrap(), None);
        assert_eq!(parse_param("page", Some(" ")).unwrap(), None);
        assert_eq!(parse_param("page", Some("3")).unwrap(), Some(3));
        assert_eq!(parse_param("page", Some("-1")).unwrap(), Some(-1));
        assert!(parse_param("page", Some("three")).is_err());
    }
}
