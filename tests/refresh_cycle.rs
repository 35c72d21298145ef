//! Integration tests for full refresh cycles against a mock HTTP server.
//!
//! Each test wires a registry, store, fetch client and scheduler together
//! and checks what the query service returns afterwards.

use std::sync::Arc;
use std::time::Duration;

use mean_feeder::feed::{FeedClass, FetchClient, Registry};
use mean_feeder::store::{EntryStore, FeedStatus, QueryService};
use mean_feeder::{Scheduler, SchedulerConfig};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS_NORMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Calm Blog</title>
    <item>
      <guid>calm-2</guid>
      <title>Second post</title>
      <link>https://calm.example/2</link>
      <pubDate>Wed, 03 Jan 2024 09:00:00 GMT</pubDate>
      <description>&lt;p&gt;Two&lt;/p&gt;</description>
    </item>
    <item>
      <guid>calm-1</guid>
      <title>First post</title>
      <link>https://calm.example/1</link>
      <pubDate>Mon, 01 Jan 2024 09:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

const ATOM_NORMAL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Notes</title>
  <entry>
    <id>urn:uuid:atom-1</id>
    <title>Atom entry</title>
    <link rel="alternate" href="https://atom.example/1"/>
    <updated>2024-01-02T12:00:00Z</updated>
  </entry>
</feed>"#;

const RSS_NOISY: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Firehose</title>
  <item><guid>n-1</guid><title>Noise</title><link>https://noisy.example/1</link>
    <pubDate>Fri, 05 Jan 2024 00:00:00 GMT</pubDate></item>
</channel></rss>"#;

struct Harness {
    server: MockServer,
    scheduler: Arc<Scheduler>,
    store: Arc<EntryStore>,
    query: QueryService,
}

async fn harness(normal: &[&str], noisy: &[&str]) -> Harness {
    let server = MockServer::start().await;
    let url = |p: &&str| format!("{}{}", server.uri(), p);
    let registry = Arc::new(Registry::from_lists(
        normal.iter().map(url).collect::<Vec<_>>(),
        noisy.iter().map(url).collect::<Vec<_>>(),
    ));
    let store = Arc::new(EntryStore::new(&registry));
    let client = FetchClient::new(Duration::from_secs(5)).unwrap();
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        client,
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            max_concurrent_fetches: 2,
        },
    ));
    let query = QueryService::new(Arc::clone(&store));
    Harness {
        server,
        scheduler,
        store,
        query,
    }
}

async fn serve(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ============================================================================
// Fault isolation
// ============================================================================

#[tokio::test]
async fn test_malformed_feed_does_not_block_others_across_cycles() {
    let h = harness(&["/calm", "/broken", "/atom"], &[]).await;
    serve(&h.server, "/calm", RSS_NORMAL).await;
    serve(
        &h.server,
        "/broken",
        r#"<rss version="2.0"><channel><item><title>oops</channel></rss>"#,
    )
    .await;
    serve(&h.server, "/atom", ATOM_NORMAL).await;

    for _ in 0..3 {
        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.feeds, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.modified, 2);

        let page = h.query.page(FeedClass::Normal, 1, Some(10)).unwrap();
        assert_eq!(page.total, 3);
        let titles: Vec<_> = page.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Second post", "Atom entry", "First post"]);
    }

    let broken = format!("{}/broken", h.server.uri());
    let feed = h.store.feed(&broken).unwrap();
    assert_eq!(feed.last_status, Some(FeedStatus::PermanentError));
    assert_eq!(feed.consecutive_failures, 3);
    assert!(h
        .store
        .view(FeedClass::Normal)
        .entries()
        .iter()
        .all(|e| e.feed_url != broken));
}

#[tokio::test]
async fn test_unreachable_and_missing_feeds_are_recorded() {
    let h = harness(&["/calm", "/gone"], &[]).await;
    serve(&h.server, "/calm", RSS_NORMAL).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&h.server)
        .await;

    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.store.partition_len(FeedClass::Normal), 2);

    let gone = h.store.feed(&format!("{}/gone", h.server.uri())).unwrap();
    assert_eq!(gone.last_status, Some(FeedStatus::PermanentError));
    assert!(gone.last_error.unwrap().contains("410"));
}

// ============================================================================
// Partitions and ordering
// ============================================================================

#[tokio::test]
async fn test_classes_page_independently() {
    let h = harness(&["/calm"], &["/noisy"]).await;
    serve(&h.server, "/calm", RSS_NORMAL).await;
    serve(&h.server, "/noisy", RSS_NOISY).await;

    h.scheduler.run_cycle().await.unwrap();

    let normal = h.query.page(FeedClass::Normal, 1, Some(1)).unwrap();
    assert_eq!(normal.entries[0].title, "Second post");
    assert!(normal.has_more);

    let normal_2 = h.query.page(FeedClass::Normal, 2, Some(1)).unwrap();
    assert_eq!(normal_2.entries[0].title, "First post");
    assert!(!normal_2.has_more);

    let noisy = h.query.page(FeedClass::Noisy, 1, None).unwrap();
    assert_eq!(noisy.total, 1);
    assert_eq!(noisy.entries[0].title, "Noise");
}

#[tokio::test]
async fn test_repeated_cycles_are_idempotent() {
    let h = harness(&["/calm"], &[]).await;
    serve(&h.server, "/calm", RSS_NORMAL).await;

    let first = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(first.new_entries, 2);
    let before = h.store.snapshot();

    let second = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(second.new_entries, 0);
    assert_eq!(second.updated_entries, 0);
    assert_eq!(h.store.snapshot().entries, before.entries);
}

#[tokio::test]
async fn test_summary_is_stripped_of_markup() {
    let h = harness(&["/calm"], &[]).await;
    serve(&h.server, "/calm", RSS_NORMAL).await;

    h.scheduler.run_cycle().await.unwrap();
    let page = h.query.page(FeedClass::Normal, 1, Some(1)).unwrap();
    assert_eq!(page.entries[0].summary.as_deref(), Some("Two"));
}
