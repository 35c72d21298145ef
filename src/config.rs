//! Runtime configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional TOML file, then environment variables. A missing file yields the
//! defaults. Unknown keys in the file are accepted and logged as a warning.
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::scheduler::SchedulerConfig;
use crate::storage::DATABASE_FILE;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// An environment variable or setting could not be parsed or is out of range.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Process configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,

    /// HTTP listen address.
    pub bind_addr: String,

    /// Seconds between the start of two refresh cycles.
    pub fetch_interval_secs: u64,

    /// Entries per page when a request gives no size.
    pub page_size: usize,

    /// Upper bound for requested page sizes.
    pub max_page_size: usize,

    /// Newline-delimited list of normal feeds.
    pub feeds_file: Option<PathBuf>,

    /// Newline-delimited list of noisy feeds.
    pub noisy_feeds_file: Option<PathBuf>,

    /// Directory holding the state database.
    pub state_dir: PathBuf,

    /// Per-fetch timeout in seconds, covering connect, headers and body.
    pub fetch_timeout_secs: u64,

    pub max_concurrent_fetches: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3102,
            bind_addr: "0.0.0.0".to_string(),
            fetch_interval_secs: 3600,
            page_size: 10,
            max_page_size: 100,
            feeds_file: None,
            noisy_feeds_file: None,
            state_dir: PathBuf::from("."),
            fetch_timeout_secs: 30,
            max_concurrent_fetches: 10,
        }
    }
}

const KNOWN_KEYS: [&str; 10] = [
    "port",
    "bind_addr",
    "fetch_interval_secs",
    "page_size",
    "max_page_size",
    "feeds_file",
    "noisy_feeds_file",
    "state_dir",
    "fetch_timeout_secs",
    "max_concurrent_fetches",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_config_file(path)? else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        };
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Empty config file, using defaults");
            return Ok(Self::default());
        }

        // Unknown keys are tolerated so older binaries accept newer files
        if let Ok(table) = content.parse::<toml::Table>() {
            table
                .keys()
                .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
                .for_each(|key| tracing::warn!(%key, "Ignoring unknown config key"));
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Builds the effective configuration: defaults, then `path` if given,
    /// then the process environment. The result is validated.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from environment variables read through `lookup`.
    ///
    /// Empty values count as unset. `STATE_DIR` takes precedence over
    /// `STATE_DIRECTORY` (as set by systemd).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PORT") {
            self.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = get("BIND_ADDR") {
            self.bind_addr = v.trim().to_string();
        }
        if let Some(v) = get("FETCH_INTERVAL") {
            self.fetch_interval_secs = parse_var("FETCH_INTERVAL", &v)?;
        }
        if let Some(v) = get("PAGE_SIZE") {
            self.page_size = parse_var("PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("MAX_PAGE_SIZE") {
            self.max_page_size = parse_var("MAX_PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("FEEDS_FILE") {
            self.feeds_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("NOISY_FEEDS_FILE") {
            self.noisy_feeds_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("STATE_DIR").or_else(|| get("STATE_DIRECTORY")) {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FETCH_TIMEOUT") {
            self.fetch_timeout_secs = parse_var("FETCH_TIMEOUT", &v)?;
        }
        if let Some(v) = get("MAX_CONCURRENT_FETCHES") {
            self.max_concurrent_fetches = parse_var("MAX_CONCURRENT_FETCHES", &v)?;
        }
        Ok(())
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_interval_secs == 0 {
            return Err(invalid("fetch_interval_secs", self.fetch_interval_secs));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", self.page_size));
        }
        if self.max_page_size == 0 {
            return Err(invalid("max_page_size", self.max_page_size));
        }
        // A default above the cap would be clamped on every request
        if self.page_size > self.max_page_size {
            return Err(invalid("page_size", self.page_size));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(invalid("fetch_timeout_secs", self.fetch_timeout_secs));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(invalid("max_concurrent_fetches", self.max_concurrent_fetches));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_addr
            .parse()
            .map_err(|_| invalid("bind_addr", &self.bind_addr))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.fetch_interval(),
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }

    /// Path of the SQLite state database.
    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

/// Reads the config file, or `None` if it does not exist.
fn read_config_file(path: &Path) -> Result<Option<String>, ConfigError> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::Io(e)),
    };
    if size > Config::MAX_FILE_SIZE {
        return Err(ConfigError::TooLarge(format!(
            "{} is {size} bytes, limit is {}",
            path.display(),
            Config::MAX_FILE_SIZE
        )));
    }
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Io(e)),
    }
}

// ============================================================================
// Tests
// ============================================================================
