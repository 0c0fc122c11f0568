//! Fetching remote resources by locator

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = concat!("object-cache/", env!("CARGO_PKG_VERSION"));

/// Fetches the raw bytes behind a locator.
///
/// Implementations report every failure as [`CacheError::Fetch`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>>;
}

/// HTTP(S) fetcher; the locator is a URL
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    fn parse_locator(locator: &str) -> Result<Url> {
        let url = Url::parse(locator)
            .map_err(|e| CacheError::Fetch(format!("invalid URL {}: {}", locator, e)))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(CacheError::Fetch(format!(
                "unsupported URL scheme: {}",
                scheme
            ))),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let url = Self::parse_locator(locator)?;
        debug!(url = %url, "Fetching remote resource");

        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Failed to fetch remote resource");
            return Err(CacheError::Fetch(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        let data = response.bytes().await?.to_vec();
        debug!(url = %url, size = data.len(), "Fetched remote resource");
        Ok(data)
    }
}
