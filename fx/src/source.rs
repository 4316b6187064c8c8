//! Reference source clients.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::{FxError, FxResult};

/// A remote publisher of the reference document.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Address used as provenance tag for produced entities.
    fn base_url(&self) -> &str;

    /// Cheap probe used to fail fast before a full fetch.
    async fn check_live(&self, timeout: Duration) -> FxResult<()>;

    /// Download the raw document.
    async fn fetch_document(&self, timeout: Duration) -> FxResult<Vec<u8>>;
}

/// Configuration for the HTTP source.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Address of the page carrying the anchors.
    pub base_url: String,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Accept certificates that fail validation.
    pub accept_invalid_certs: bool,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.bcv.org.ve/".to_string(),
            user_agent: concat!("ratekeeper/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_invalid_certs: false,
        }
    }
}

/// Source backed by a plain HTTP page.
pub struct HttpRateSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRateSource {
    /// Create a new HTTP source.
    pub fn new(config: &HttpSourceConfig) -> FxResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| FxError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn map_error(&self, operation: &str, err: reqwest::Error) -> FxError {
        if err.is_timeout() {
            FxError::Timeout(format!("{} {}", operation, self.base_url))
        } else {
            FxError::SourceUnavailable(format!("{} {}: {}", operation, self.base_url, err))
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        "HTTP"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self), fields(url = %self.base_url))]
    async fn check_live(&self, timeout: Duration) -> FxResult<()> {
        let response = self
            .client
            .head(&self.base_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_error("HEAD", e))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            warn!(status = status.as_u16(), "Source liveness probe rejected");
            return Err(FxError::SourceStatus {
                status: status.as_u16(),
            });
        }

        debug!(status = status.as_u16(), "Source is live");
        Ok(())
    }

    #[instrument(skip(self), fields(url = %self.base_url))]
    async fn fetch_document(&self, timeout: Duration) -> FxResult<Vec<u8>> {
        let response = self
            .client
            .get(&self.base_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_error("GET", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FxError::SourceStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error("GET body", e))?;

        debug!(bytes = body.len(), "Fetched source document");
        Ok(body.to_vec())
    }
}

/// Mock source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    base_url: String,
    document: parking_lot::RwLock<Option<String>>,
    live: std::sync::atomic::AtomicBool,
    fetch_delay: parking_lot::RwLock<Option<Duration>>,
    live_checks: std::sync::atomic::AtomicUsize,
    fetches: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a live mock source serving `document`.
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            base_url: "https://mock.source/".to_string(),
            document: parking_lot::RwLock::new(Some(document.into())),
            live: std::sync::atomic::AtomicBool::new(true),
            fetch_delay: parking_lot::RwLock::new(None),
            live_checks: std::sync::atomic::AtomicUsize::new(0),
            fetches: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Replace the served document; `None` makes fetches fail with a 503.
    pub fn set_document(&self, document: Option<String>) {
        *self.document.write() = document;
    }

    /// Toggle the liveness probe.
    pub fn set_live(&self, live: bool) {
        self.live.store(live, std::sync::atomic::Ordering::SeqCst);
    }

    /// Delay every fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.write() = delay;
    }

    /// Number of liveness probes received.
    pub fn live_check_count(&self) -> usize {
        self.live_checks.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of fetches received.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        "MOCK"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_live(&self, _timeout: Duration) -> FxResult<()> {
        self.live_checks
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if self.live.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FxError::SourceUnavailable("mock source is down".to_string()))
        }
    }

    async fn fetch_document(&self, timeout: Duration) -> FxResult<Vec<u8>> {
        self.fetches.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let delay = *self.fetch_delay.read();
        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(FxError::Timeout("mock fetch".to_string()));
            }
            tokio::time::sleep(delay).await;
        }

        let document = self.document.read().clone();
        document
            .map(String::into_bytes)
            .ok_or(FxError::SourceStatus { status: 503 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_source_serves_document() {
        let source = MockRateSource::new("<html></html>");

        source.check_live(Duration::from_secs(1)).await.unwrap();
        let body = source.fetch_document(Duration::from_secs(1)).await.unwrap();

        assert_eq!(body, b"<html></html>");
        assert_eq!(source.live_check_count(), 1);
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_mock_source_down() {
        let source = MockRateSource::new("<html></html>");
        source.set_live(false);

        let result = tokio_test::block_on(source.check_live(Duration::from_secs(1)));
        assert!(matches!(result, Err(FxError::SourceUnavailable(_))));
        assert_eq!(source.live_check_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_source_missing_document_is_status_error() {
        let source = MockRateSource::new("");
        source.set_document(None);

        let result = source.fetch_document(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(FxError::SourceStatus { status: 503 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_source_honors_timeout() {
        let source = MockRateSource::new("<html></html>");
        source.set_fetch_delay(Some(Duration::from_secs(60)));

        let result = source.fetch_document(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(FxError::Timeout(_))));
    }

    #[test]
    fn test_http_source_builds_from_defaults() {
        let source = HttpRateSource::new(&HttpSourceConfig::default()).unwrap();
        assert_eq!(source.base_url(), "https://www.bcv.org.ve/");
        assert_eq!(source.name(), "HTTP");
    }
}
