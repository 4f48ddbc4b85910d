//! Fetching remote documents and artifacts.
//!
//! Everything the update engine downloads (the release metadata document, the
//! remote manifest and each artifact) goes through the [`Transport`] trait so
//! the engine can be driven against a local mirror or an in-memory fixture.
//! [`HttpTransport`] is the production implementation.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::RefitError;

/// Source of remote bytes.
pub trait Transport: Send + Sync {
    /// Fetch the full body at `url`.
    ///
    /// Implementations must fail rather than return a partial body.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// HTTP(S) transport backed by `reqwest`, with `file://` support for local
/// mirrors.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("refit/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(|e| RefitError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("GET {} returned HTTP {}", url, status);
            return Err(RefitError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            }
            .into());
        }

        let body = response.bytes().await.map_err(|e| RefitError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(body.to_vec())
    }
}

impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", url);
        match file_url_path(url) {
            Some(path) => tokio::fs::read(&path).await.map_err(|e| {
                RefitError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
                .into()
            }),
            None => self.fetch_http(url).await,
        }
    }
}

fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryTransport;

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use super::Transport;
    use crate::core::RefitError;
    use anyhow::Result;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory transport serving fixed bodies, recording every request.
    #[derive(Debug, Default)]
    pub struct MemoryTransport {
        files: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<String>>,
    }

    impl MemoryTransport {
        /// Empty transport; every fetch fails.
        pub fn new() -> Self {
            Self::default()
        }

        /// Serve `body` at `url`.
        #[must_use]
        pub fn with_file(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
            self.files.insert(url.into(), body.into());
            self
        }

        /// URLs requested so far, in order.
        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    impl Transport for MemoryTransport {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(url.to_string());
            }
            self.files.get(url).cloned().ok_or_else(|| {
                RefitError::DownloadFailed {
                    url: url.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                }
                .into()
            })
        }
    }
}
