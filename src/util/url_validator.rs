use thiserror::Error;
use url::Url;

/// Errors that can occur during feed URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component (e.g. `http:///feed`).
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed source.
///
/// Unlike a general-purpose link checker this does not reject private
/// or loopback addresses: the feed list is written by the operator of a
/// self-hosted instance, and feeds on the local network are legitimate.
///
/// # Errors
///
/// - [`UrlValidationError::InvalidUrl`] if the string does not parse
/// - [`UrlValidationError::UnsupportedScheme`] for anything but http/https
/// - [`UrlValidationError::MissingHost`] if the host is empty
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Returns `true` if `link` is safe to hand to a browser as an entry link.
///
/// Relative links are accepted (some feeds emit them and the presentation
/// layer resolves them); absolute links must be http or https so that
/// `javascript:` and `data:` links from hostile feeds never reach a page.
pub fn is_acceptable_link(link: &str) -> bool {
    match Url::parse(link.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(url::ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    }
}
