use std::thread::sleep;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for fetching remote input documents
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds (for exponential backoff cap)
    pub max_retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            user_agent: format!("validate-schematron/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Blocking HTTP client for `http(s)://` inputs.
///
/// Called from validation workers, which are plain threads, so it never needs a
/// runtime of its own.
pub struct RemoteFetcher {
    client: Client,
    config: HttpClientConfig,
}

impl RemoteFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    /// Download `url`, retrying server errors and connection failures with
    /// exponential backoff
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get_response_with_retry(url)?;
        let bytes = response.bytes()?;
        debug!(url, bytes = bytes.len(), "fetched remote document");
        Ok(bytes.to_vec())
    }

    fn get_response_with_retry(&self, url: &str) -> Result<Response> {
        let mut attempt = 0;

        loop {
            match self.client.get(url).send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    // Retry on server errors (5xx) but not client errors (4xx)
                    if status.is_server_error() && attempt < self.config.retry_attempts {
                        self.wait_before_retry(url, attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(Error::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                        message: format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Unknown")
                        ),
                    });
                }
                Err(error) => {
                    if attempt < self.config.retry_attempts && is_retryable(&error) {
                        self.wait_before_retry(url, attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(error.into());
                }
            }
        }
    }

    fn wait_before_retry(&self, url: &str, attempt: u32) {
        let delay = self.retry_delay(attempt);
        warn!(url, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "retrying request");
        sleep(delay);
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .retry_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.config.max_retry_delay_ms))
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
