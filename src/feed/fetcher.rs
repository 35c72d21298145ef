use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::util::validate_url;

/// Default per-fetch timeout covering connect, headers and body.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies above this size are refused (10MB)
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024;

const USER_AGENT: &str = concat!("mean-feeder/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while fetching one feed.
///
/// Each variant is classified as transient or permanent by
/// [`FetchError::is_transient`]. The distinction is for operators only:
/// both kinds are retried on the next cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The feed URL is unusable (unparseable, non-HTTP scheme, no host)
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The whole exchange exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// HTTP response with a status we do not accept
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("Response too large (limit {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Server answered 304 but sent a body anyway
    #[error("Not-modified response carried a {0} byte body")]
    UnexpectedBody(usize),
}

impl FetchError {
    /// Whether the failure looks like it may resolve on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_)
            | FetchError::Timeout(_)
            | FetchError::IncompleteResponse { .. }
            | FetchError::UnexpectedBody(_) => true,
            FetchError::HttpStatus(code) => {
                *code == StatusCode::TOO_MANY_REQUESTS.as_u16() || *code >= 500
            }
            FetchError::InvalidUrl(_) | FetchError::ResponseTooLarge(_) => false,
        }
    }
}

/// HTTP cache validators from a previous successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let validators = Validators {
            etag: header_string(headers, ETAG),
            last_modified: header_string(headers, LAST_MODIFIED),
        };
        if validators.is_empty() {
            None
        } else {
            Some(validators)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Outcome of a single fetch attempt.
#[derive(Debug)]
pub enum FetchOutcome {
    /// New content, with whatever validators the server returned.
    Modified {
        body: Vec<u8>,
        validators: Option<Validators>,
    },
    /// The server confirmed our cached copy is current.
    NotModified,
    /// Network trouble, timeout, 5xx, 429: expected to clear up.
    TransientFailure(FetchError),
    /// Bad URL, 4xx, oversized body: needs operator attention.
    PermanentFailure(FetchError),
}

impl FetchOutcome {
    fn failure(error: FetchError) -> Self {
        if error.is_transient() {
            FetchOutcome::TransientFailure(error)
        } else {
            FetchOutcome::PermanentFailure(error)
        }
    }
}

/// HTTP client for feed documents.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: reqwest::Client,
    timeout: Duration,
    max_body: usize,
}

impl FetchClient {
    /// Builds a client with the given per-fetch timeout.
    ///
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self::with_client(client, timeout))
    }

    /// Wraps an existing `reqwest::Client` (tests, custom TLS setups).
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            max_body: MAX_FEED_SIZE,
        }
    }

    /// Overrides the response size limit.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Performs one conditional GET for `url`.
    ///
    /// Never retries: a failed fetch is retried by the next scheduler
    /// cycle. Has no side effects beyond the request itself.
    pub async fn fetch(&self, url: &str, validators: Option<&Validators>) -> FetchOutcome {
        let url = match validate_url(url) {
            Ok(url) => url,
            Err(e) => return FetchOutcome::PermanentFailure(FetchError::InvalidUrl(e.to_string())),
        };

        let mut request = self.client.get(url);
        if let Some(v) = validators {
            if let Some(etag) = &v.etag {
                request = request.header(IF_NONE_MATCH, etag.as_str());
            }
            if let Some(last_modified) = &v.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
            }
        }

        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => FetchOutcome::failure(e),
            Err(_) => FetchOutcome::TransientFailure(FetchError::Timeout(self.timeout)),
        }
    }

    async fn exchange(&self, request: reqwest::RequestBuilder) -> Result<FetchOutcome, FetchError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            let body = read_limited_bytes(response, self.max_body).await?;
            if !body.is_empty() {
                return Err(FetchError::UnexpectedBody(body.len()));
            }
            return Ok(FetchOutcome::NotModified);
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let validators = Validators::from_headers(response.headers());
        let body = read_limited_bytes(response, self.max_body).await?;
        Ok(FetchOutcome::Modified { body, validators })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
