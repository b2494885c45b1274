//! Model artifact sources.
//!
//! The lifecycle manager only sees [`ModelSource`]; production uses
//! [`UrlModelSource`], tests substitute in-memory fakes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::error::ModelLoadError;
use crate::retry::{RetryExecutor, RetryStrategy};

/// Where the remote model artifact comes from
pub trait ModelSource: Send + Sync {
    /// Human-readable location for logs and errors
    fn describe(&self) -> String;

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<u8>, ModelLoadError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Http(String),
    File(PathBuf),
}

impl Location {
    fn parse(url: &str) -> Self {
        if url.starts_with("http://") || url.starts_with("https://") {
            Location::Http(url.to_string())
        } else if let Some(path) = url.strip_prefix("file://") {
            Location::File(PathBuf::from(path))
        } else {
            Location::File(PathBuf::from(url))
        }
    }
}

/// Fetches `http(s)://` URLs with reqwest and `file://` (or bare) paths from disk
pub struct UrlModelSource {
    url: String,
    location: Location,
    client: reqwest::Client,
    max_bytes: u64,
    retry: RetryStrategy,
}

impl UrlModelSource {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        max_bytes: u64,
        retry: RetryStrategy,
    ) -> Result<Self, ModelLoadError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelLoadError::Fetch {
                source_desc: url.clone(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            location: Location::parse(&url),
            url,
            client,
            max_bytes,
            retry,
        })
    }

    fn check_size(&self, size: u64) -> Result<(), ModelLoadError> {
        if size > self.max_bytes {
            return Err(ModelLoadError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, ModelLoadError> {
        let fetch_error = |reason: String| ModelLoadError::Fetch {
            source_desc: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ModelLoadError::HttpStatus {
                source_desc: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        if let Some(length) = response.content_length() {
            self.check_size(length)?;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_error(format!("Failed to read response: {}", e)))?;
        self.check_size(bytes.len() as u64)?;

        Ok(bytes.to_vec())
    }

    async fn fetch_file(&self, path: &Path) -> Result<Vec<u8>, ModelLoadError> {
        let fetch_error = |reason: String| ModelLoadError::Fetch {
            source_desc: path.display().to_string(),
            reason,
        };

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| fetch_error(format!("Failed to stat file: {}", e)))?;
        self.check_size(metadata.len())?;

        tokio::fs::read(path)
            .await
            .map_err(|e| fetch_error(format!("Failed to read file: {}", e)))
    }
}

impl ModelSource for UrlModelSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<u8>, ModelLoadError>> {
        Box::pin(async move {
            info!(model_url = %self.url, "Fetching model artifact");
            let executor = RetryExecutor::new(self.retry.clone());

            let bytes = match &self.location {
                Location::Http(url) => executor.execute(|| self.fetch_http(url)).await?,
                // Local reads are not worth retrying
                Location::File(path) => self.fetch_file(path).await?,
            };

            debug!(model_url = %self.url, size = bytes.len(), "Model artifact fetched");
            Ok(bytes)
        })
    }
}
