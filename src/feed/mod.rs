//! Feed sources, HTTP retrieval and RSS/Atom parsing.
//!
//! - [`registry`] - the static list of configured feeds and their class
//! - [`fetcher`] - conditional HTTP GET with timeout and failure classification
//! - [`parser`] - RSS 2.0 / Atom parsing into normalized [`RawEntry`] values
//!
//! # Example
//!
//! ```ignore
//! use mean_feeder::feed::{parse, FetchClient, FetchOutcome, Registry};
//!
//! let registry = Registry::from_lists(["https://lobste.rs/rss"], Vec::<String>::new());
//! let client = FetchClient::new(std::time::Duration::from_secs(30))?;
//! if let FetchOutcome::Modified { body, .. } = client.fetch(&registry.list()[0].url, None).await {
//!     let feed = parse(&body)?;
//! }
//! ```

mod fetcher;
mod parser;
mod registry;

pub use fetcher::{
    FetchClient, FetchError, FetchOutcome, Validators, DEFAULT_FETCH_TIMEOUT, MAX_FEED_SIZE,
};
pub use parser::{parse, FeedFormat, ParseError, ParsedFeed, RawEntry};
pub use registry::{FeedClass, FeedSource, Registry, RegistryError, UnknownClass};
