//! HTTP client with retry, backoff, and TLS enforcement.
//!
//! Shared infrastructure for the HTTP-based message sources (Bot API, History API).

use backoff::{future::retry_notify, ExponentialBackoff};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{ImgdupError, Result};

/// Configuration for a source HTTP client.
#[derive(Debug, Clone)]
pub struct SourceHttpConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors.
    pub max_retries: u32,
    /// Initial retry interval.
    pub initial_interval: Duration,
    /// Maximum retry interval.
    pub max_interval: Duration,
    /// Refuse plain-HTTP endpoints.
    pub https_only: bool,
}

impl Default for SourceHttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            https_only: true,
        }
    }
}

/// HTTP client with retry and backoff.
pub struct SourceHttpClient {
    client: Client,
    config: SourceHttpConfig,
}

impl SourceHttpClient {
    /// Create a new HTTP client with the given configuration.
    pub fn new(config: SourceHttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .https_only(config.https_only)
            .build()
            .map_err(|e| {
                ImgdupError::SourceUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// GET a JSON document with retry.
    pub async fn get_json<R>(
        &self,
        url: &str,
        bearer: Option<&str>,
        query: &[(&str, String)],
        source_name: &str,
    ) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let response = self.send_with_retry(url, bearer, query, source_name).await?;
        response.json::<R>().await.map_err(|e| {
            warn!(error = %e, "Failed to parse JSON response");
            ImgdupError::SourceUnavailable(format!("Failed to parse {source_name} response: {e}"))
        })
    }

    /// GET raw bytes with retry.
    pub async fn get_bytes(
        &self,
        url: &str,
        bearer: Option<&str>,
        source_name: &str,
    ) -> Result<Vec<u8>> {
        let response = self.send_with_retry(url, bearer, &[], source_name).await?;
        let bytes = response.bytes().await.map_err(|e| {
            ImgdupError::SourceUnavailable(format!("Failed to read {source_name} body: {e}"))
        })?;
        Ok(bytes.to_vec())
    }

    async fn send_with_retry(
        &self,
        url: &str,
        bearer: Option<&str>,
        query: &[(&str, String)],
        source_name: &str,
    ) -> Result<reqwest::Response> {
        retry_notify(
            self.build_backoff(),
            || async { self.send_once(url, bearer, query, source_name).await },
            |err: ImgdupError, duration: Duration| {
                warn!(
                    error = %err,
                    retry_after_ms = duration.as_millis() as u64,
                    "Retry scheduled"
                );
            },
        )
        .await
    }

    async fn send_once(
        &self,
        url: &str,
        bearer: Option<&str>,
        query: &[(&str, String)],
        source_name: &str,
    ) -> std::result::Result<reqwest::Response, backoff::Error<ImgdupError>> {
        let start = Instant::now();

        let mut request: RequestBuilder = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            let latency_ms = start.elapsed().as_millis();
            if is_transient_error(&e) {
                warn!(error = %e, latency_ms = latency_ms as u64, "Transient error, will retry");
                backoff::Error::transient(ImgdupError::SourceUnavailable(format!(
                    "Transient error (will retry): {e}"
                )))
            } else {
                warn!(error = %e, latency_ms = latency_ms as u64, "Permanent error, aborting");
                backoff::Error::permanent(ImgdupError::SourceUnavailable(format!(
                    "{source_name} request failed: {e}"
                )))
            }
        })?;

        let status = response.status();
        debug!(status = %status, "Received HTTP response");

        if !status.is_success() {
            let latency_ms = start.elapsed().as_millis();
            let err = ImgdupError::SourceUnavailable(format!(
                "{source_name} API returned status: {status}"
            ));
            return if is_transient_status(status) {
                warn!(status = %status, latency_ms = latency_ms as u64, "Transient HTTP status, will retry");
                Err(backoff::Error::transient(err))
            } else {
                warn!(status = %status, latency_ms = latency_ms as u64, "Permanent HTTP error");
                Err(backoff::Error::permanent(err))
            };
        }

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Request completed successfully"
        );
        Ok(response)
    }

    fn build_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_interval: self.config.max_interval,
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries),
            ..Default::default()
        }
    }
}

/// Check if a reqwest error is transient and should be retried.
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Check if an HTTP status code indicates a transient error.
///
/// 429 is the upstream rate limiter pushing back; it is retried with backoff
/// on top of the scanner's own inter-batch cooldown.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}
