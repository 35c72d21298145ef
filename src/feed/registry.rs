use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while loading the feed lists.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A configured feed list exists but could not be read.
    #[error("Failed to read feed list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which section of the page a feed's entries are shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedClass {
    /// Low-volume sources, shown first.
    Normal,
    /// High-volume sources ("firehose"), shown in their own section.
    Noisy,
}

impl FeedClass {
    pub const ALL: [FeedClass; 2] = [FeedClass::Normal, FeedClass::Noisy];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedClass::Normal => "normal",
            FeedClass::Noisy => "noisy",
        }
    }
}

impl fmt::Display for FeedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown class name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown feed class: {0} (expected \"normal\" or \"noisy\")")]
pub struct UnknownClass(pub String);

impl FromStr for FeedClass {
    type Err = UnknownClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "main" => Ok(FeedClass::Normal),
            "noisy" | "firehose" => Ok(FeedClass::Noisy),
            _ => Err(UnknownClass(s.to_string())),
        }
    }
}

/// A configured feed: its URL and the class it was listed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedSource {
    pub url: String,
    pub class: FeedClass,
}

/// The static set of feeds for this process.
///
/// Built once at startup from the normal and noisy lists; membership never
/// changes afterwards. Each URL appears at most once across both classes.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    feeds: Vec<FeedSource>,
    index: HashMap<String, FeedClass>,
}

impl Registry {
    /// Builds a registry from already-split URL lists.
    ///
    /// Entries are trimmed; blank lines and `#` comments are ignored. The
    /// first occurrence of a URL wins: later duplicates within a class are
    /// dropped, and a URL listed as both normal and noisy stays normal.
    pub fn from_lists<N, Q, S1, S2>(normal: N, noisy: Q) -> Self
    where
        N: IntoIterator<Item = S1>,
        Q: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let mut registry = Registry::default();
        for line in normal {
            registry.push(line.as_ref(), FeedClass::Normal);
        }
        for line in noisy {
            registry.push(line.as_ref(), FeedClass::Noisy);
        }
        registry
    }

    /// Loads the registry from newline-delimited list files.
    ///
    /// A list that is not configured, or whose file does not exist, means
    /// zero feeds of that class.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Io`] if a file exists but cannot be read.
    pub fn load(
        feeds_file: Option<&Path>,
        noisy_feeds_file: Option<&Path>,
    ) -> Result<Self, RegistryError> {
        let normal = read_list(feeds_file, FeedClass::Normal)?;
        let noisy = read_list(noisy_feeds_file, FeedClass::Noisy)?;
        let registry = Self::from_lists(normal.lines(), noisy.lines());

        tracing::info!(
            normal = registry.count(FeedClass::Normal),
            noisy = registry.count(FeedClass::Noisy),
            "Loaded feed registry"
        );
        Ok(registry)
    }

    fn push(&mut self, line: &str, class: FeedClass) {
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            return;
        }

        if let Some(existing) = self.index.get(url) {
            tracing::warn!(
                url = %url,
                listed_as = %class,
                kept_as = %existing,
                "Duplicate feed URL ignored"
            );
            return;
        }

        self.index.insert(url.to_string(), class);
        self.feeds.push(FeedSource {
            url: url.to_string(),
            class,
        });
    }

    /// All feeds: normal ones in file order, then noisy ones in file order.
    pub fn list(&self) -> &[FeedSource] {
        &self.feeds
    }

    pub fn class_of(&self, url: &str) -> Option<FeedClass> {
        self.index.get(url).copied()
    }

    pub fn count(&self, class: FeedClass) -> usize {
        self.feeds.iter().filter(|f| f.class == class).count()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

fn read_list(path: Option<&Path>, class: FeedClass) -> Result<String, RegistryError> {
    let Some(path) = path else {
        tracing::debug!(class = %class, "No feed list configured");
        return Ok(String::new());
    };

    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                class = %class,
                path = %path.display(),
                "Feed list not found, no feeds of this class"
            );
            Ok(String::new())
        }
        Err(source) => Err(RegistryError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}
