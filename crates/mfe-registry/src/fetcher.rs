//! Registry document fetchers.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use mfe_core::RegistryDocument;

use crate::error::{RegistryError, RegistryResult};

/// Default HTTP request timeout (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves a registry document from a URL.
#[async_trait]
pub trait RegistryFetcher: Send + Sync {
    /// Fetch and decode the document at `url`.
    async fn fetch(&self, url: &str) -> RegistryResult<RegistryDocument>;
}

/// Fetches registry documents over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpRegistryFetcher {
    client: reqwest::Client,
}

impl HttpRegistryFetcher {
    /// Create a fetcher with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Fetch`] if the HTTP client cannot be built
    /// (e.g. TLS backend unavailable).
    pub fn new() -> RegistryResult<Self> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a fetcher with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Fetch`] if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> RegistryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .user_agent(concat!("mfe-host/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::Fetch {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RegistryFetcher for HttpRegistryFetcher {
    async fn fetch(&self, url: &str) -> RegistryResult<RegistryDocument> {
        let fail = |message: String| RegistryError::Fetch {
            url: url.to_string(),
            message,
        };

        debug!(url, "Fetching registry document");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {status}")));
        }

        response
            .json::<RegistryDocument>()
            .await
            .map_err(|e| fail(format!("invalid registry document: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_url_is_a_fetch_error() {
        let fetcher = HttpRegistryFetcher::with_timeout(Duration::from_secs(2)).unwrap();
        let err = fetcher.fetch("http://127.0.0.1:1/registry.json").await.unwrap_err();
        match err {
            RegistryError::Fetch { url, .. } => assert_eq!(url, "http://127.0.0.1:1/registry.json"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_url_is_a_fetch_error() {
        let fetcher = HttpRegistryFetcher::new().unwrap();
        assert!(matches!(
            fetcher.fetch("not a url").await,
            Err(RegistryError::Fetch { .. })
        ));
    }
}
