//! mean-feeder: a self-hosted RSS/Atom aggregator.
//!
//! Feeds listed in two plain-text files (normal and noisy) are refreshed on a
//! fixed interval. Their items are deduplicated into an in-memory store,
//! persisted to SQLite, and served as two independently paginated,
//! newest-first lists over a small JSON API.

pub mod config;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod util;
pub mod web;

pub use config::{Config, ConfigError};
pub use scheduler::{CycleReport, Phase, Scheduler, SchedulerConfig, SchedulerHandle};
