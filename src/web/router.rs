//! Router configuration.

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{health, list_entries, list_feeds, not_found, AppState};

/// Create the full application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/entries/:class", get(list_entries))
        .route("/feeds", get(list_feeds));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Registry;
    use crate::store::{EntryStore, FeedStatus, QueryService};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    const NORMAL: &str = "https://a.example/rss";
    const NOISY: &str = "https://noisy.example/rss";

    fn app() -> (Router, Arc<EntryStore>) {
        let registry = Registry::from_lists([NORMAL], [NOISY]);
        let store = Arc::new(EntryStore::new(&registry));
        let query = QueryService::new(Arc::clone(&store)).with_page_sizes(2, 5);
        let router = create_router(Arc::new(AppState::new(query)));
        (router, store)
    }

    fn seed(store: &EntryStore) {
        let items = (1..=3)
            .map(|d| crate::feed::RawEntry {
                guid: Some(format!("a{d}")),
                title: Some(format!("Normal {d}")),
                link: Some(format!("https://a.example/{d}")),
                summary: None,
                published: Some(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()),
            })
            .collect();
        store.merge(NORMAL, items).unwrap();
        store
            .record_success(NORMAL, Utc::now(), Some("Feed A".into()), None)
            .unwrap();
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_entries_first_page() {
        let (router, store) = app();
        seed(&store);

        let (status, body) = get(router, "/api/entries/normal").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 1);
        assert_eq!(body["page_size"], 2);
        assert_eq!(body["total"], 3);
        assert_eq!(body["has_more"], true);
        assert_eq!(body["entries"][0]["title"], "Normal 3");
        assert_eq!(body["entries"][0]["feed_title"], "Feed A");
        assert_eq!(body["entries"][1]["title"], "Normal 2");
    }

    #[tokio::test]
    async fn test_entries_last_and_past_end_pages() {
        let (router, store) = app();
        seed(&store);

        let (status, body) = get(router.clone(), "/api/entries/normal?page=2&page_size=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);
        assert_eq!(body["has_more"], false);

        let (status, body) = get(router, "/api/entries/normal?page=9").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"].as_array().unwrap().len(), 0);
        assert_eq!(body["has_more"], false);
    }

    #[tokio::test]
    async fn test_noisy_partition_is_separate() {
        let (router, store) = app();
        seed(&store);

        let (status, body) = get(router, "/api/entries/noisy").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let (router, _store) = app();

        for uri in [
            "/api/entries/loud",
            "/api/entries/normal?page=0",
            "/api/entries/normal?page_size=0",
            "/api/entries/normal?page_size=-4",
            "/api/entries/normal?page=first",
        ] {
            let (status, body) = get(router.clone(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"]["code"], "BAD_REQUEST", "{uri}");
        }
    }

    #[tokio::test]
    async fn test_feeds_endpoint() {
        let (router, store) = app();
        seed(&store);
        store
            .record_failure(NOISY, Utc::now(), FeedStatus::PermanentError, "HTTP 404")
            .unwrap();

        let (status, body) = get(router, "/api/feeds").await;
        assert_eq!(status, StatusCode::OK);
        let feeds = body.as_array().unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0]["url"], NORMAL);
        assert_eq!(feeds[0]["entries"], 3);
        assert_eq!(feeds[0]["last_status"], "ok");
        assert_eq!(feeds[1]["class"], "noisy");
        assert_eq!(feeds[1]["last_status"], "permanent_error");
        assert_eq!(feeds[1]["last_error"], "HTTP 404");
    }

    #[tokio::test]
    async fn test_health() {
        let (router, store) = app();
        seed(&store);

        let (status, body) = get(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["entries"], 3);
        assert_eq!(body["feeds"], 2);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (router, _store) = app();
        let (status, body) = get(router, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}
