//! Document fetching.
//!
//! Provides the [`Fetch`] seam the tracking engine pulls documents
//! through, and [`HttpFetcher`], its HTTP implementation. Upstream
//! failures that say more about the service than about us (4xx/5xx,
//! timeouts, refused connections) map to
//! [`FetchError::InaccessibleContent`], which the engine reports without
//! aborting a batch. Everything else is a bug and fails the batch.

use async_trait::async_trait;
use std::time::Duration;

/// Default timeout for a single document fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Mime type assumed when the server does not say.
const DEFAULT_MIME_TYPE: &str = "text/html";

/// Errors raised while fetching a document.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The upstream service did not hand the document over. Recoverable
    /// from the batch's point of view: reported, not fatal.
    #[error("could not fetch {location}: {reason}")]
    InaccessibleContent { location: String, reason: String },

    /// The fetch location is not a valid URL.
    #[error("invalid fetch location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },

    /// The response could not be read.
    #[error("failed to read response from {location}: {reason}")]
    MalformedResponse { location: String, reason: String },
}

impl FetchError {
    /// Whether this failure is the recoverable per-document kind.
    pub fn is_inaccessible(&self) -> bool {
        matches!(self, FetchError::InaccessibleContent { .. })
    }
}

/// A fetched document: its declared mime type and raw bytes.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Mime type from the `Content-Type` header, parameters stripped.
    pub mime_type: String,
    /// Raw response body.
    pub content: Vec<u8>,
}

/// Source of raw documents for the tracking engine.
///
/// Implemented by [`HttpFetcher`] in production and by scripted stubs in
/// tests.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetches the document at `location`.
    async fn fetch(&self, location: &str) -> Result<FetchedDocument, FetchError>;
}

/// HTTP implementation of [`Fetch`] backed by a shared reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("termwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<FetchedDocument, FetchError> {
        let response = self.client.get(location).send().await.map_err(|e| {
            if e.is_builder() {
                FetchError::InvalidLocation {
                    location: location.to_string(),
                    reason: e.to_string(),
                }
            } else {
                // Timeouts, refused connections, DNS failures: the
                // document is unreachable right now, not broken forever.
                FetchError::InaccessibleContent {
                    location: location.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::InaccessibleContent {
                location: location.to_string(),
                reason: format!("http {}", status.as_u16()),
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_mime_type)
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let content = response
            .bytes()
            .await
            .map_err(|e| FetchError::MalformedResponse {
                location: location.to_string(),
                reason: e.to_string(),
            })?
            .to_vec();

        tracing::debug!("Fetched {location} ({mime_type}, {} bytes)", content.len());

        Ok(FetchedDocument { mime_type, content })
    }
}

/// Strips parameters from a `Content-Type` value: `text/html; charset=utf-8`
/// becomes `text/html`.
fn normalize_mime_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or(value)
        .trim()
        .to_ascii_lowercase()
}
