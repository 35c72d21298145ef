//! RSS 2.0 / Atom parsing on top of `feed-rs`.
//!
//! Both formats are normalized into [`RawEntry`], the shape the entry store
//! merges. Namespaced extensions (iTunes, Media RSS, Dublin Core titles)
//! never leak into the core fields.

use chrono::{DateTime, Utc};
use feed_rs::model::{FeedType, Link};
use feed_rs::parser::{self, ParseErrorKind, ParseFeedError};
use thiserror::Error;

use crate::util::{collapse_whitespace, is_acceptable_link, summarize};

/// Errors that make a whole document unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// XML syntax error.
    #[error("Malformed XML: {0}")]
    Malformed(String),

    /// Not an RSS 2.0 or Atom document (HTML pages, RSS 1.0, JSON Feed).
    #[error("Unsupported feed format: {0}")]
    UnsupportedFormat(String),

    /// The bytes could not be decoded in the declared encoding.
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<ParseFeedError> for ParseError {
    fn from(err: ParseFeedError) -> Self {
        match err {
            ParseFeedError::ParseError(ParseErrorKind::NoFeedRoot) => {
                ParseError::UnsupportedFormat("no RSS or Atom root element".to_string())
            }
            ParseFeedError::IoError(e) => ParseError::Encoding(e.to_string()),
            other => ParseError::Malformed(other.to_string()),
        }
    }
}

/// Wire format of a parsed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

impl FeedFormat {
    fn from_feed_type(feed_type: &FeedType) -> Result<Self, ParseError> {
        match feed_type {
            // RSS 0.9x shares the <rss> root and item layout with 2.0
            FeedType::RSS2 | FeedType::RSS0 => Ok(FeedFormat::Rss),
            FeedType::Atom => Ok(FeedFormat::Atom),
            other => Err(ParseError::UnsupportedFormat(format!("{other:?}"))),
        }
    }
}

/// One item as it appeared in the document, before identity resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    /// RSS `<guid>` or Atom `<id>`; `None` when missing or blank.
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// Result of parsing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    pub title: Option<String>,
    /// Entries in document order.
    pub entries: Vec<RawEntry>,
    /// Items dropped because no identity could be derived or their link
    /// used a non-web scheme.
    pub skipped: usize,
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// First link that points at the item itself (`rel` absent or `alternate`).
fn alternate_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|link| matches!(link.rel.as_deref(), None | Some("alternate")))
        .and_then(|link| non_empty(link.href.trim()))
}

/// Returns `None` if the item is unusable and should be skipped.
fn to_raw_entry(entry: feed_rs::model::Entry) -> Option<RawEntry> {
    let guid = non_empty(entry.id.trim());
    let title = entry
        .title
        .and_then(|t| non_empty(&collapse_whitespace(&t.content)));
    let link = alternate_link(&entry.links);

    if guid.is_none() && title.is_none() && link.is_none() {
        return None;
    }
    if let Some(link) = &link {
        if !is_acceptable_link(link) {
            return None;
        }
    }

    let summary = entry
        .summary
        .and_then(|s| summarize(&s.content))
        .or_else(|| entry.content.and_then(|c| c.body).and_then(|b| summarize(&b)));

    Some(RawEntry {
        guid,
        title,
        link,
        summary,
        published: entry.published.or(entry.updated),
    })
}

/// Parses an RSS 2.0 or Atom document.
///
/// # Errors
///
/// - [`ParseError::Malformed`] on XML syntax errors
/// - [`ParseError::UnsupportedFormat`] for anything but `<rss>`/`<feed>`
/// - [`ParseError::Encoding`] if the body cannot be decoded
///
/// Individual unusable items are skipped and counted in
/// [`ParsedFeed::skipped`] rather than failing the document.
pub fn parse(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    // Leave missing ids empty so they hash from link and title later
    let parser = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build();
    let feed = parser.parse(bytes)?;
    let format = FeedFormat::from_feed_type(&feed.feed_type)?;

    let total = feed.entries.len();
    let entries: Vec<RawEntry> = feed.entries.into_iter().filter_map(to_raw_entry).collect();

    Ok(ParsedFeed {
        format,
        title: feed
            .title
            .and_then(|t| non_empty(&collapse_whitespace(&t.content))),
        skipped: total - entries.len(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com/</link>
    <item>
      <title>First &amp; foremost</title>
      <link>https://example.com/1</link>
      <guid isPermaLink="false">post-1</guid>
      <pubDate>Wed, 03 Jan 2024 10:00:00 GMT</pubDate>
      <description><![CDATA[<p>Hello <b>world</b></p>]]></description>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/2</link>
      <content:encoded><![CDATA[<p>Body only</p>]]></content:encoded>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <entry>
    <title>Atom entry</title>
    <link rel="self" href="https://example.org/self/1"/>
    <link rel="alternate" href="https://example.org/1"/>
    <id>urn:uuid:1225c695</id>
    <updated>2024-01-02T00:00:00Z</updated>
    <published>2024-01-01T12:30:00+02:00</published>
    <summary type="html">&lt;p&gt;Summary&lt;/p&gt;</summary>
  </entry>
  <entry>
    <title>Updated only</title>
    <link rel="alternate" href="https://example.org/2"/>
    <id>urn:uuid:2</id>
    <updated>2024-01-05T08:00:00Z</updated>
    <content type="html">&lt;p&gt;Inline &lt;em&gt;html&lt;/em&gt;&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let feed = parse(RSS.as_bytes()).unwrap();
        assert_eq!(feed.format, FeedFormat::Rss);
        assert_eq!(feed.title.as_deref(), Some("Example Blog"));
        assert_eq!(feed.skipped, 0);
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.guid.as_deref(), Some("post-1"));
        assert_eq!(first.title.as_deref(), Some("First & foremost"));
        assert_eq!(first.link.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.summary.as_deref(), Some("Hello world"));
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap())
        );

        let second = &feed.entries[1];
        assert_eq!(second.guid, None);
        assert_eq!(second.summary.as_deref(), Some("Body only"));
        assert_eq!(second.published, None);
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse(ATOM.as_bytes()).unwrap();
        assert_eq!(feed.format, FeedFormat::Atom);
        assert_eq!(feed.title.as_deref(), Some("Atom Example"));
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.guid.as_deref(), Some("urn:uuid:1225c695"));
        assert_eq!(first.link.as_deref(), Some("https://example.org/1"));
        assert_eq!(first.summary.as_deref(), Some("Summary"));
        // <published> wins over <updated>, normalized to UTC
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap())
        );

        let second = &feed.entries[1];
        assert_eq!(second.link.as_deref(), Some("https://example.org/2"));
        assert_eq!(second.summary.as_deref(), Some("Inline html"));
        assert_eq!(
            second.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_itunes_title_does_not_leak_into_title() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Cast</title>
    <item>
      <title>Episode 1</title>
      <itunes:title>Ep One</itunes:title>
      <link>https://cast.example/1</link>
    </item>
  </channel>
</rss>"#;
        let feed = parse(xml.as_bytes()).unwrap();
        let episode = &feed.entries[0];
        assert_eq!(episode.guid, None);
        assert_eq!(episode.title.as_deref(), Some("Episode 1"));
        assert_eq!(episode.link.as_deref(), Some("https://cast.example/1"));
    }

    #[test]
    fn test_declared_latin1_encoding_is_decoded() {
        let xml: &[u8] = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n\
<rss version=\"2.0\"><channel><title>Caf\xe9</title>\
<item><guid>1</guid><title>Caf\xe9 cr\xe8me</title></item>\
</channel></rss>";
        let feed = parse(xml).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Café"));
        assert_eq!(feed.entries[0].title.as_deref(), Some("Café crème"));
    }

    #[test]
    fn test_unsupported_documents() {
        assert!(matches!(
            parse(b"<html><body>nope</body></html>"),
            Err(ParseError::UnsupportedFormat(_))
        ));

        let rdf = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel rdf:about="https://example.com/"><title>RDF</title></channel>
  <item rdf:about="https://example.com/1"><title>One</title><link>https://example.com/1</link></item>
</rdf:RDF>"#;
        assert!(matches!(
            parse(rdf.as_bytes()),
            Err(ParseError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(parse(br#"<rss version="2.0"><channel><item></channel></rss>"#).is_err());
        assert!(parse(b"<not valid xml").is_err());
        assert!(parse(b"").is_err());
    }

    #[test]
    fn test_bom_accepted() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(RSS.as_bytes());
        assert!(parse(&bytes).is_ok());
    }

    #[test]
    fn test_unusable_items_skipped() {
        let xml = r#"<rss version="2.0"><channel>
            <item><description>no identity at all</description></item>
            <item><title>Bad link</title><link>javascript:alert(1)</link></item>
            <item><title>Good</title><link>https://example.com/ok</link></item>
        </channel></rss>"#;
        let feed = parse(xml.as_bytes()).unwrap();
        assert_eq!(feed.skipped, 2);
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.entries[0].title.as_deref(), Some("Good"));
    }

    #[test]
    fn test_blank_guid_is_none() {
        let xml = r#"<rss version="2.0"><channel><item><guid>   </guid><title>T</title></item></channel></rss>"#;
        let feed = parse(xml.as_bytes()).unwrap();
        assert_eq!(feed.entries[0].guid, None);
    }

    #[test]
    fn test_unparseable_date_is_none() {
        let xml = r#"<rss version="2.0"><channel><item><guid>1</guid><pubDate>yesterday-ish</pubDate></item></channel></rss>"#;
        let feed = parse(xml.as_bytes()).unwrap();
        assert_eq!(feed.entries[0].published, None);
    }
}
