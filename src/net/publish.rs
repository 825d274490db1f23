//! Topic publishing over HTTP.
//!
//! Each publish is a `POST {broker_url}/topics/{topic}` carrying the raw
//! payload, retried with exponential backoff.
//!
//! Uses a shared HTTP client to avoid connection pool leaks and reduce
//! memory overhead from creating new clients for each request.

use super::{NetError, Publisher};
use once_cell::sync::Lazy;
use std::time::Duration;

/// Shared HTTP client for all publishes
///
/// Configured with reasonable defaults for an embedded device:
/// - 10 second timeout
/// - Single idle connection per host (minimize memory)
/// - 30 second idle timeout (release connections promptly)
static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(1)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
});

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_retries: u32,
    /// Base delay between retries (doubled each attempt)
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Publisher that forwards topic messages to an HTTP message bridge
#[derive(Debug, Clone)]
pub struct HttpBridge {
    base_url: String,
    retry: RetryConfig,
}

impl HttpBridge {
    pub fn new(base_url: &str) -> Self {
        Self::with_retry(base_url, RetryConfig::default())
    }

    pub fn with_retry(base_url: &str, retry: RetryConfig) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// URL a topic is published to
    pub fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic.trim_matches('/'))
    }
}

impl Publisher for HttpBridge {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NetError> {
        let url = self.topic_url(topic);
        tracing::debug!("Publishing {} bytes to {}", payload.len(), url);

        publish_with_retry(&HTTP_CLIENT, &url, bytes::Bytes::from(payload), &self.retry).await
    }
}

/// POST with retry logic
async fn publish_with_retry(
    client: &reqwest::Client,
    url: &str,
    payload: bytes::Bytes,
    config: &RetryConfig,
) -> Result<(), NetError> {
    let mut last_error = None;

    for attempt in 0..config.max_retries {
        if attempt > 0 {
            let delay = config.retry_delay * 2u32.pow(attempt - 1);
            tracing::debug!(
                "Retry attempt {}/{}, waiting {:?}",
                attempt + 1,
                config.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        let request = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.clone());

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                tracing::warn!("HTTP error: {} for {}", status, url);
                last_error = Some(NetError::HttpError {
                    status: status.as_u16(),
                });
            }
            Err(e) => {
                tracing::warn!("Publish failed: {} for {}", e, url);
                last_error = Some(NetError::RequestError(e));
            }
        }
    }

    Err(last_error.unwrap_or(NetError::RetriesExhausted))
}
