//! In-memory entry store and the paginated read path over it.
//!
//! [`EntryStore`] owns every feed record and entry. The scheduler is its only
//! writer; [`QueryService`] only ever reads published partition views.

mod entries;
mod query;
mod types;

pub use entries::{entry_identity, EntryStore, PartitionView, UNTITLED};
pub use query::{Page, QueryError, QueryService, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE};
pub use types::{Entry, Feed, FeedStatus, MergeStats, StoreError, StoreSnapshot};
