//! Utility functions for common operations.
//!
//! - **URL validation**: feed URL and entry link checks
//! - **Text processing**: whitespace normalization, HTML stripping and
//!   summary truncation for feed content
//!
//! # Examples
//!
//! ```
//! use mean_feeder::util::{summarize, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//!
//! assert_eq!(summarize("<p>Hello <b>world</b></p>").as_deref(), Some("Hello world"));
//! ```

mod text;
mod url_validator;

pub use text::{collapse_whitespace, html_to_text, summarize, truncate_chars, MAX_SUMMARY_CHARS};
pub use url_validator::{is_acceptable_link, validate_url, UrlValidationError};
