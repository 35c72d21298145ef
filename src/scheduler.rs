//! Periodic refresh of every registered feed.
//!
//! A cycle fetches all feeds concurrently (bounded), then folds the results
//! into the [`EntryStore`] one feed at a time and persists a snapshot. Cycles
//! never overlap: a tick that arrives while one is running is dropped.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};

use crate::feed::{parse, FetchClient, FetchOutcome, ParseError, ParsedFeed, Registry, Validators};
use crate::storage::Database;
use crate::store::{EntryStore, FeedStatus};

/// Default time between the start of two cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Default number of feeds fetched at the same time.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 10;

/// Shortest tick period the ticker accepts.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub max_concurrent_fetches: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

/// What the scheduler is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    /// Requests are in flight
    FetchingAll,
    /// All fetches finished; results are being merged and persisted
    MergingResults,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub feeds: usize,
    pub modified: usize,
    pub not_modified: usize,
    pub failed: usize,
    pub new_entries: usize,
    pub updated_entries: usize,
    /// Items dropped by the parser across all feeds
    pub skipped_items: usize,
}

/// Result of fetching and parsing one feed, before it touches the store.
enum Fetched {
    Parsed {
        feed: ParsedFeed,
        validators: Option<Validators>,
    },
    NotModified,
    ParseFailed(ParseError),
    Failed(FeedStatus, String),
}

struct FeedResult {
    url: String,
    fetched_at: DateTime<Utc>,
    fetched: Fetched,
}

/// Clears the running flag and resets the phase when a cycle ends,
/// including when its task is aborted.
struct CycleGuard<'a> {
    scheduler: &'a Scheduler,
}

impl<'a> CycleGuard<'a> {
    fn acquire(scheduler: &'a Scheduler) -> Option<Self> {
        scheduler
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { scheduler })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.set_phase(Phase::Idle);
        self.scheduler.running.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    registry: Arc<Registry>,
    store: Arc<EntryStore>,
    client: FetchClient,
    config: SchedulerConfig,
    db: Option<Database>,
    running: AtomicBool,
    phase: Mutex<Phase>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<EntryStore>,
        client: FetchClient,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            client,
            config,
            db: None,
            running: AtomicBool::new(false),
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Persist a store snapshot at the end of every cycle.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one refresh cycle over every registered feed.
    ///
    /// Returns `None` without doing anything if a cycle is already running.
    /// Individual feed failures are recorded on the feed and never abort the
    /// cycle.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let _guard = CycleGuard::acquire(self)?;
        let started = Instant::now();

        self.set_phase(Phase::FetchingAll);
        let jobs: Vec<(String, Option<Validators>)> = self
            .registry
            .list()
            .iter()
            .map(|source| {
                let validators = self
                    .store
                    .feed(&source.url)
                    .and_then(|feed| feed.validators);
                (source.url.clone(), validators)
            })
            .collect();

        let client = &self.client;
        let results: Vec<FeedResult> = stream::iter(jobs)
            .map(|(url, validators)| async move {
                let outcome = client.fetch(&url, validators.as_ref()).await;
                let fetched_at = Utc::now();
                let fetched = match outcome {
                    FetchOutcome::Modified { body, validators } => match parse(&body) {
                        Ok(feed) => Fetched::Parsed { feed, validators },
                        Err(e) => Fetched::ParseFailed(e),
                    },
                    FetchOutcome::NotModified => Fetched::NotModified,
                    FetchOutcome::TransientFailure(e) => {
                        Fetched::Failed(FeedStatus::TransientError, e.to_string())
                    }
                    FetchOutcome::PermanentFailure(e) => {
                        Fetched::Failed(FeedStatus::PermanentError, e.to_string())
                    }
                };
                FeedResult {
                    url,
                    fetched_at,
                    fetched,
                }
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        self.set_phase(Phase::MergingResults);
        let mut report = CycleReport {
            feeds: results.len(),
            ..CycleReport::default()
        };
        for result in results {
            self.apply(result, &mut report);
        }

        if let Some(db) = &self.db {
            if let Err(e) = db.save_snapshot(&self.store.snapshot()).await {
                tracing::warn!(error = %e, "Failed to persist store snapshot");
            }
        }

        tracing::info!(
            feeds = report.feeds,
            modified = report.modified,
            not_modified = report.not_modified,
            failed = report.failed,
            new = report.new_entries,
            updated = report.updated_entries,
            skipped = report.skipped_items,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh cycle complete"
        );
        Some(report)
    }

    fn apply(&self, result: FeedResult, report: &mut CycleReport) {
        let FeedResult {
            url,
            fetched_at,
            fetched,
        } = result;

        let recorded = match fetched {
            Fetched::Parsed { feed, validators } => {
                report.skipped_items += feed.skipped;
                match self.store.merge_at(&url, feed.entries, fetched_at) {
                    Ok(stats) => {
                        report.modified += 1;
                        report.new_entries += stats.new;
                        report.updated_entries += stats.updated;
                        tracing::debug!(
                            feed = %url,
                            format = ?feed.format,
                            new = stats.new,
                            updated = stats.updated,
                            skipped = feed.skipped,
                            "Feed refreshed"
                        );
                        self.store
                            .record_success(&url, fetched_at, feed.title, validators)
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(feed = %url, error = %e, "Failed to merge feed entries");
                        Err(e)
                    }
                }
            }
            Fetched::NotModified => {
                report.not_modified += 1;
                tracing::debug!(feed = %url, "Feed not modified");
                self.store.record_not_modified(&url, fetched_at)
            }
            Fetched::ParseFailed(e) => {
                report.failed += 1;
                tracing::warn!(feed = %url, error = %e, "Failed to parse feed");
                self.store
                    .record_failure(&url, fetched_at, FeedStatus::PermanentError, e.to_string())
            }
            Fetched::Failed(status, message) => {
                report.failed += 1;
                tracing::warn!(feed = %url, status = %status, error = %message, "Failed to fetch feed");
                self.store.record_failure(&url, fetched_at, status, message)
            }
        };

        if let Err(e) = recorded {
            tracing::warn!(feed = %url, error = %e, "Failed to record feed status");
        }
    }

    /// Starts the background ticker.
    ///
    /// The first cycle starts immediately, then one per interval. Each cycle
    /// runs in its own task so a slow cycle never delays the ticker; ticks
    /// that arrive while a cycle is still running are skipped.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut current: Option<JoinHandle<()>> = None;

            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => {
                        tracing::info!("Scheduler shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        if self.is_running() {
                            tracing::info!("Previous refresh cycle still running, skipping tick");
                            continue;
                        }
                        let scheduler = Arc::clone(&self);
                        current = Some(tokio::spawn(async move {
                            if scheduler.run_cycle().await.is_none() {
                                tracing::debug!("Refresh cycle already running");
                            }
                        }));
                    }
                }
            }

            if let Some(cycle) = current {
                cycle.abort();
                let _ = cycle.await;
            }
        });

        SchedulerHandle { cancel_tx, join }
    }
}

/// Handle to a running ticker.
pub struct SchedulerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the ticker, aborts an in-flight cycle and waits for both.
    pub async fn stop(self) -> Result<(), JoinError> {
        let _ = self.cancel_tx.send(());
        self.join.await
    }
}
