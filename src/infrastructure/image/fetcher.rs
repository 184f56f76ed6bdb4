//! HTTP implementation of the image fetcher port.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use tracing::trace;

use crate::domain::ports::{CacheError, CacheResult, ImageFetcherPort};

/// User agent sent with every image request.
pub const USER_AGENT: &str = concat!("photocache/", env!("CARGO_PKG_VERSION"));

/// Fetches image bytes with a plain GET. No retries, no redirects handling
/// beyond reqwest's defaults.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher with the given request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Parses `url` and rejects anything that is not http(s).
///
/// # Errors
/// Returns `CacheError::InvalidUrl` for unparsable URLs or other schemes.
pub fn parse_image_url(url: &str) -> CacheResult<Url> {
    let parsed = Url::parse(url).map_err(|e| CacheError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(CacheError::InvalidUrl(format!(
            "{url}: unsupported scheme {other}"
        ))),
    }
}

#[async_trait]
impl ImageFetcherPort for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<Bytes> {
        let parsed = parse_image_url(url)?;
        trace!(url = %parsed, "GET image");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CacheError::NetworkError(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Failed to read body: {e}")))
    }
}
