use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::types::{Entry, Feed, FeedStatus, MergeStats, StoreError, StoreSnapshot};
use crate::feed::{FeedClass, RawEntry, Registry, Validators};
use crate::util::collapse_whitespace;

/// Title used when an item carried none.
pub const UNTITLED: &str = "(untitled)";

/// Resolves the stable identity of an item within its feed.
///
/// The trimmed guid when present, otherwise the hex SHA-256 of the
/// whitespace-collapsed link and title joined by a newline.
pub fn entry_identity(raw: &RawEntry) -> String {
    if let Some(guid) = raw.guid.as_deref() {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}\n{}",
        collapse_whitespace(raw.link.as_deref().unwrap_or("")),
        collapse_whitespace(raw.title.as_deref().unwrap_or(""))
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

// ============================================================================
// Internal State
// ============================================================================

/// Position of an entry inside its partition.
///
/// Newest first; ties broken by identity, then feed URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    published_at: Reverse<DateTime<Utc>>,
    identity: String,
    feed_url: String,
}

impl OrderKey {
    fn of(entry: &Entry) -> Self {
        Self {
            published_at: Reverse(entry.published_at),
            identity: entry.identity.clone(),
            feed_url: entry.feed_url.clone(),
        }
    }
}

/// `(feed_url, identity)`
type EntryKey = (String, String);

#[derive(Debug, Default)]
struct Partition {
    ordered: BTreeMap<OrderKey, Arc<Entry>>,
    index: HashMap<EntryKey, OrderKey>,
}

impl Partition {
    fn insert(&mut self, entry: Entry) {
        let key = (entry.feed_url.clone(), entry.identity.clone());
        let order = OrderKey::of(&entry);
        if let Some(previous) = self.index.insert(key, order.clone()) {
            self.ordered.remove(&previous);
        }
        self.ordered.insert(order, Arc::new(entry));
    }

    fn view(&self) -> Arc<PartitionView> {
        Arc::new(PartitionView {
            entries: self.ordered.values().cloned().collect(),
        })
    }
}

/// Writable state, only touched with the master lock held.
#[derive(Debug, Default)]
struct Master {
    partitions: [Partition; 2],
}

/// An immutable, ordered copy of one partition.
///
/// Readers hold an `Arc` to a view; merges never mutate a published view,
/// they replace it.
#[derive(Debug, Default)]
pub struct PartitionView {
    entries: Vec<Arc<Entry>>,
}

impl PartitionView {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in partition order.
    pub fn entries(&self) -> &[Arc<Entry>] {
        &self.entries
    }
}

fn slot(class: FeedClass) -> usize {
    match class {
        FeedClass::Normal => 0,
        FeedClass::Noisy => 1,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Entry Store
// ============================================================================

/// Deduplicated entries of every registered feed, split by class.
///
/// All writes go through one mutex, so merges are applied one at a time.
/// After a merge the affected partition's view is rebuilt and swapped in,
/// which means a reader sees either all of a merge or none of it.
#[derive(Debug)]
pub struct EntryStore {
    master: Mutex<Master>,
    views: [RwLock<Arc<PartitionView>>; 2],
    /// Feed records in registry order
    feeds: RwLock<Vec<Feed>>,
    positions: HashMap<String, usize>,
}

impl EntryStore {
    /// Creates an empty store for the feeds of `registry`.
    pub fn new(registry: &Registry) -> Self {
        let feeds: Vec<Feed> = registry
            .list()
            .iter()
            .map(|source| Feed::new(source.url.clone(), source.class))
            .collect();
        let positions = feeds
            .iter()
            .enumerate()
            .map(|(i, feed)| (feed.url.clone(), i))
            .collect();

        Self {
            master: Mutex::new(Master::default()),
            views: Default::default(),
            feeds: RwLock::new(feeds),
            positions,
        }
    }

    /// Rebuilds a store from a persisted snapshot.
    ///
    /// Only feeds present in `registry` are kept. A feed whose class changed
    /// since the snapshot was taken keeps its entries under the new class.
    pub fn restore(registry: &Registry, snapshot: StoreSnapshot) -> Self {
        let store = Self::new(registry);
        let mut dropped_feeds = 0usize;
        let mut dropped_entries = 0usize;

        {
            let mut feeds = store.write_feeds();
            for saved in snapshot.feeds {
                let Some(&pos) = store.positions.get(&saved.url) else {
                    dropped_feeds += 1;
                    continue;
                };
                let feed = &mut feeds[pos];
                feed.title = saved.title;
                feed.last_fetch_at = saved.last_fetch_at;
                feed.last_status = saved.last_status;
                feed.last_error = saved.last_error;
                feed.validators = saved.validators;
                feed.consecutive_failures = saved.consecutive_failures;
            }
        }

        let mut master = lock(&store.master);
        for entry in snapshot.entries {
            match registry.class_of(&entry.feed_url) {
                Some(class) => master.partitions[slot(class)].insert(entry),
                None => dropped_entries += 1,
            }
        }
        for class in FeedClass::ALL {
            store.publish(class, &master);
        }
        drop(master);

        if dropped_feeds > 0 || dropped_entries > 0 {
            tracing::info!(
                feeds = dropped_feeds,
                entries = dropped_entries,
                "Dropped saved state of feeds no longer configured"
            );
        }
        tracing::info!(
            normal = store.partition_len(FeedClass::Normal),
            noisy = store.partition_len(FeedClass::Noisy),
            "Restored entry store"
        );
        store
    }

    fn class_of(&self, feed_url: &str) -> Result<FeedClass, StoreError> {
        self.positions
            .get(feed_url)
            .map(|&pos| self.read_feeds()[pos].class)
            .ok_or_else(|| StoreError::UnknownFeed(feed_url.to_string()))
    }

    /// Merges one feed's freshly parsed items, using the current time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownFeed`] if `feed_url` is not registered.
    pub fn merge(&self, feed_url: &str, raw: Vec<RawEntry>) -> Result<MergeStats, StoreError> {
        self.merge_at(feed_url, raw, Utc::now())
    }

    /// Merges one feed's items as if observed at `now`.
    ///
    /// New identities are inserted with `first_seen_at = now` and
    /// `published_at` from the source, or `now` when it had none. Known
    /// identities only have their title, link and summary refreshed.
    pub fn merge_at(
        &self,
        feed_url: &str,
        raw: Vec<RawEntry>,
        now: DateTime<Utc>,
    ) -> Result<MergeStats, StoreError> {
        let class = self.class_of(feed_url)?;
        let mut stats = MergeStats::default();

        let mut master = lock(&self.master);
        let partition = &mut master.partitions[slot(class)];

        for item in raw {
            let identity = entry_identity(&item);
            let title = item
                .title
                .as_deref()
                .map(|t| collapse_whitespace(t).into_owned())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED.to_string());
            let link = item.link.unwrap_or_default();
            let key = (feed_url.to_string(), identity);

            let position = partition.index.get(&key).cloned();
            let existing = position.and_then(|order| partition.ordered.get_mut(&order));

            match existing {
                Some(current) => {
                    if current.title == title
                        && current.link == link
                        && current.summary == item.summary
                    {
                        stats.unchanged += 1;
                        continue;
                    }
                    // Identity, dates and position are kept.
                    let mut updated = (**current).clone();
                    updated.title = title;
                    updated.link = link;
                    updated.summary = item.summary;
                    *current = Arc::new(updated);
                    stats.updated += 1;
                }
                None => {
                    let (feed_url, identity) = key;
                    partition.insert(Entry {
                        identity,
                        feed_url,
                        title,
                        link,
                        summary: item.summary,
                        published_at: item.published.unwrap_or(now),
                        published_from_source: item.published.is_some(),
                        first_seen_at: now,
                    });
                    stats.new += 1;
                }
            }
        }

        if stats.new > 0 || stats.updated > 0 {
            self.publish(class, &master);
        }
        drop(master);

        tracing::debug!(
            feed = %feed_url,
            new = stats.new,
            updated = stats.updated,
            unchanged = stats.unchanged,
            "Merged entries"
        );
        Ok(stats)
    }

    /// Swaps in a fresh view of `class`. Called with the master lock held so
    /// views are published in merge order.
    fn publish(&self, class: FeedClass, master: &Master) {
        let view = master.partitions[slot(class)].view();
        *self.views[slot(class)]
            .write()
            .unwrap_or_else(PoisonError::into_inner) = view;
    }

    /// The currently published view of one partition.
    pub fn view(&self, class: FeedClass) -> Arc<PartitionView> {
        Arc::clone(
            &self.views[slot(class)]
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn partition_len(&self, class: FeedClass) -> usize {
        self.view(class).len()
    }

    /// Total number of entries across both partitions.
    pub fn len(&self) -> usize {
        FeedClass::ALL.iter().map(|&c| self.partition_len(c)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Feed status
    // ========================================================================

    fn read_feeds(&self) -> std::sync::RwLockReadGuard<'_, Vec<Feed>> {
        self.feeds.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_feeds(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Feed>> {
        self.feeds.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_feed(&self, url: &str, apply: impl FnOnce(&mut Feed)) -> Result<(), StoreError> {
        let pos = *self
            .positions
            .get(url)
            .ok_or_else(|| StoreError::UnknownFeed(url.to_string()))?;
        apply(&mut self.write_feeds()[pos]);
        Ok(())
    }

    /// Records a fetch whose body was parsed and merged.
    ///
    /// `validators` replaces what was stored; `title` only overwrites the
    /// stored title when the document had one.
    pub fn record_success(
        &self,
        url: &str,
        at: DateTime<Utc>,
        title: Option<String>,
        validators: Option<Validators>,
    ) -> Result<(), StoreError> {
        self.update_feed(url, |feed| {
            feed.last_fetch_at = Some(at);
            feed.last_status = Some(FeedStatus::Ok);
            feed.last_error = None;
            feed.consecutive_failures = 0;
            feed.validators = validators.filter(|v| !v.is_empty());
            if title.is_some() {
                feed.title = title;
            }
        })
    }

    /// Records a 304 response. Stored validators stay valid.
    pub fn record_not_modified(&self, url: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update_feed(url, |feed| {
            feed.last_fetch_at = Some(at);
            feed.last_status = Some(FeedStatus::Ok);
            feed.last_error = None;
            feed.consecutive_failures = 0;
        })
    }

    /// Records a failed fetch or parse. Entries and validators are untouched.
    pub fn record_failure(
        &self,
        url: &str,
        at: DateTime<Utc>,
        status: FeedStatus,
        message: impl Into<String>,
    ) -> Result<(), StoreError> {
        let message = message.into();
        self.update_feed(url, |feed| {
            feed.last_fetch_at = Some(at);
            feed.last_status = Some(status);
            feed.last_error = Some(message);
            feed.consecutive_failures = feed.consecutive_failures.saturating_add(1);
        })
    }

    /// All feeds in registry order.
    pub fn feeds(&self) -> Vec<Feed> {
        self.read_feeds().clone()
    }

    pub fn feed(&self, url: &str) -> Option<Feed> {
        let pos = *self.positions.get(url)?;
        self.read_feeds().get(pos).cloned()
    }

    /// Number of stored entries per feed URL.
    pub fn entry_counts(&self) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for class in FeedClass::ALL {
            for entry in self.view(class).entries() {
                *counts.entry(entry.feed_url.clone()).or_default() += 1;
            }
        }
        counts
    }

    /// A consistent copy of all feeds and entries.
    pub fn snapshot(&self) -> StoreSnapshot {
        let master = lock(&self.master);
        let feeds = self.feeds();
        let entries = master
            .partitions
            .iter()
            .flat_map(|p| p.ordered.values().map(|e| (**e).clone()))
            .collect();
        StoreSnapshot { feeds, entries }
    }
}
