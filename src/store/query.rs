use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::entries::EntryStore;
use super::types::Entry;
use crate::feed::FeedClass;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;

/// Errors for malformed page requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Pages are numbered from 1.
    #[error("Invalid page number {0}: pages start at 1")]
    InvalidPage(i64),

    #[error("Invalid page size {0}: must be at least 1")]
    InvalidPageSize(i64),

    #[error("Unknown feed class: {0}")]
    UnknownClass(String),
}

/// One page of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub entries: Vec<Entry>,
    pub page: u64,
    /// Effective size after defaulting and clamping
    pub page_size: usize,
    /// Entries in the whole partition
    pub total: usize,
    pub has_more: bool,
}

/// Read-only, paginated access to the published partitions.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<EntryStore>,
    default_page_size: usize,
    max_page_size: usize,
}

impl QueryService {
    pub fn new(store: Arc<EntryStore>) -> Self {
        Self {
            store,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    /// Sets the default and maximum page sizes. Zero values are raised to 1
    /// and the default never exceeds the maximum.
    pub fn with_page_sizes(mut self, default_page_size: usize, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self.default_page_size = default_page_size.clamp(1, self.max_page_size);
        self
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    /// Returns page `page_number` (1-based) of `class`.
    ///
    /// `page_size` defaults to the configured size and is clamped to the
    /// maximum. A page past the end is empty with `has_more = false`.
    ///
    /// # Errors
    ///
    /// [`QueryError::InvalidPage`] for `page_number < 1` and
    /// [`QueryError::InvalidPageSize`] for `page_size <= 0`.
    pub fn page(
        &self,
        class: FeedClass,
        page_number: i64,
        page_size: Option<i64>,
    ) -> Result<Page, QueryError> {
        if page_number < 1 {
            return Err(QueryError::InvalidPage(page_number));
        }
        let page_size = match page_size {
            None => self.default_page_size,
            Some(size) if size <= 0 => return Err(QueryError::InvalidPageSize(size)),
            Some(size) => usize::try_from(size)
                .unwrap_or(usize::MAX)
                .min(self.max_page_size),
        };
        let page = page_number as u64;

        let view = self.store.view(class);
        let total = view.len();
        let offset = usize::try_from(page - 1)
            .ok()
            .and_then(|p| p.checked_mul(page_size))
            .unwrap_or(usize::MAX);

        let (entries, has_more) = if offset >= total {
            (Vec::new(), false)
        } else {
            let end = offset.saturating_add(page_size).min(total);
            let entries = view.entries()[offset..end]
                .iter()
                .map(|e| (**e).clone())
                .collect();
            (entries, end < total)
        };

        Ok(Page {
            entries,
            page,
            page_size,
            total,
            has_more,
        })
    }

    /// Like [`page`](Self::page), with the class given by name.
    pub fn page_named(
        &self,
        class: &str,
        page_number: i64,
        page_size: Option<i64>,
    ) -> Result<Page, QueryError> {
        let class: FeedClass = class
            .parse()
            .map_err(|_| QueryError::UnknownClass(class.to_string()))?;
        self.page(class, page_number, page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{RawEntry, Registry};
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const FEED_A: &str = "https://a.example/rss";
    const FEED_B: &str = "https://b.example/rss";
    const NOISY: &str = "https://noisy.example/rss";

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn item(guid: &str, published: DateTime<Utc>) -> RawEntry {
        RawEntry {
            guid: Some(guid.to_string()),
            title: Some(format!("Entry {guid}")),
            link: Some(format!("https://example.com/{guid}")),
            summary: None,
            published: Some(published),
        }
    }

    fn service() -> QueryService {
        let registry = Registry::from_lists([FEED_A, FEED_B], [NOISY]);
        QueryService::new(Arc::new(EntryStore::new(&registry)))
    }

    #[test]
    fn test_two_feeds_page_size_one() {
        let query = service();
        let store = query.store();
        store.merge(FEED_A, vec![item("a", day(3))]).unwrap();
        store.merge(FEED_B, vec![item("b", day(1))]).unwrap();

        let first = query.page(FeedClass::Normal, 1, Some(1)).unwrap();
        assert_eq!(first.entries.len(), 1);
        assert_eq!(first.entries[0].published_at, day(3));
        assert!(first.has_more);

        let second = query.page(FeedClass::Normal, 2, Some(1)).unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].published_at, day(1));
        assert!(!second.has_more);
        assert_eq!(second.total, 2);
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let query = service();
        query.store().merge(FEED_A, vec![item("a", day(3))]).unwrap();

        let page = query.page(FeedClass::Normal, 5, Some(10)).unwrap();
        assert!(page.entries.is_empty());
        assert!(!page.has_more);

        let huge = query.page(FeedClass::Normal, i64::MAX, Some(100)).unwrap();
        assert!(huge.entries.is_empty());
        assert!(!huge.has_more);
    }

    #[test]
    fn test_empty_partition() {
        let page = service().page(FeedClass::Noisy, 1, None).unwrap();
        assert_eq!(page.total, 0);
        assert!(page.entries.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let query = service();
        assert_eq!(
            query.page(FeedClass::Normal, 0, None),
            Err(QueryError::InvalidPage(0))
        );
        assert_eq!(
            query.page(FeedClass::Normal, -3, None),
            Err(QueryError::InvalidPage(-3))
        );
        assert_eq!(
            query.page(FeedClass::Normal, 1, Some(0)),
            Err(QueryError::InvalidPageSize(0))
        );
        assert_eq!(
            query.page(FeedClass::Normal, 1, Some(-5)),
            Err(QueryError::InvalidPageSize(-5))
        );
        assert_eq!(
            query.page_named("loud", 1, None),
            Err(QueryError::UnknownClass("loud".into()))
        );
    }

    #[test]
    fn test_page_size_defaults_and_clamps() {
        let query = service().with_page_sizes(2, 3);
        let items = (1..=5).map(|d| item(&d.to_string(), day(d))).collect();
        query.store().merge(FEED_A, items).unwrap();

        let page = query.page(FeedClass::Normal, 1, None).unwrap();
        assert_eq!(page.page_size, 2);
        assert_eq!(page.entries.len(), 2);

        let page = query.page(FeedClass::Normal, 1, Some(1_000)).unwrap();
        assert_eq!(page.page_size, 3);
        assert_eq!(page.entries.len(), 3);
        assert!(page.has_more);
    }

    #[test]
    fn test_noisy_entries_never_in_normal_pages() {
        let query = service();
        query.store().merge(NOISY, vec![item("n", day(9))]).unwrap();
        query.store().merge(FEED_A, vec![item("a", day(1))]).unwrap();

        let normal = query.page_named("normal", 1, Some(100)).unwrap();
        assert_eq!(normal.total, 1);
        assert!(normal.entries.iter().all(|e| e.feed_url == FEED_A));

        let noisy = query.page_named("noisy", 1, Some(100)).unwrap();
        assert_eq!(noisy.total, 1);
        assert!(noisy.entries.iter().all(|e| e.feed_url == NOISY));
    }

    proptest! {
        #[test]
        fn prop_pages_strictly_descending(
            hours in proptest::collection::hash_set(0i64..100_000, 1..60),
            page_size in 1i64..8,
        ) {
            let query = service();
            let items: Vec<RawEntry> = hours
                .iter()
                .map(|h| item(&h.to_string(), day(1) + chrono::Duration::hours(*h)))
                .collect();
            query.store().merge(FEED_A, items).unwrap();

            let mut seen = Vec::new();
            let mut page_number = 1;
            loop {
                let page = query.page(FeedClass::Normal, page_number, Some(page_size)).unwrap();
                prop_assert!(page.entries.len() <= page_size as usize);
                seen.extend(page.entries.iter().map(|e| e.published_at));
                if !page.has_more {
                    break;
                }
                page_number += 1;
            }

            prop_assert_eq!(seen.len(), hours.len());
            for pair in seen.windows(2) {
                prop_assert!(pair[0] > pair[1]);
            }
        }
    }
}
