//! Retrying HTTP client for calls to the form source
//!
//! This module provides an HTTP client that classifies failures into
//! transient and permanent ones and retries the transient ones through a
//! [`RetryManager`]. Upstream `429` responses honor `Retry-After`.

use crate::config::{RetryConfig, SourceConfig};
use crate::error::FetchError;
use crate::sync::retry::RetryManager;
use bytes::Bytes;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client with bounded retries and exponential backoff
///
/// Features:
/// - Connect and overall request timeouts on every call
/// - rustls with TLS 1.2 as the minimum protocol version
/// - Configurable set of transient statuses
/// - HTTP 429 handling with Retry-After support
#[derive(Debug, Clone)]
pub struct RetryingHttpClient {
    client: Client,
    retry: RetryManager,
    transient_statuses: HashSet<u16>,
}

impl RetryingHttpClient {
    /// Build a client for the given source
    ///
    /// `default_headers` are sent with every request; credentials belong
    /// there and should be marked sensitive.
    pub fn new(
        source: &SourceConfig,
        retry: RetryConfig,
        default_headers: HeaderMap,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .use_rustls_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .https_only(source.https_only)
            .connect_timeout(Duration::from_secs(source.connect_timeout_secs))
            .timeout(Duration::from_secs(source.request_timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, retry))
    }

    /// Create a retrying client around a custom reqwest Client
    pub fn with_client(client: Client, retry: RetryConfig) -> Self {
        Self {
            client,
            transient_statuses: retry.transient_statuses.iter().copied().collect(),
            retry: RetryManager::new(retry),
        }
    }

    /// Perform a GET request, retrying transient failures
    pub async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        self.retry.execute(|| self.get_once(url)).await
    }

    /// Perform a single GET request without retries
    pub async fn get_once(&self, url: &str) -> Result<Bytes, FetchError> {
        debug!(url = url, "Sending HTTP GET request");

        let response = self.client.get(url).send().await.map_err(map_send_error)?;
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await.map_err(map_send_error)?;
            debug!(
                url = url,
                status = status.as_u16(),
                body_size = body.len(),
                "Received response"
            );
            return Ok(body);
        }

        Err(self.classify(url, response))
    }

    /// Map a non-success response to a fetch error
    fn classify(&self, url: &str, response: Response) -> FetchError {
        let status = response.status();
        let code = status.as_u16();

        match status {
            StatusCode::TOO_MANY_REQUESTS if self.transient_statuses.contains(&code) => {
                let wait = retry_after_secs(response.headers()).unwrap_or(0);
                warn!(url = url, retry_after = wait, "Rate limited by upstream");
                FetchError::RateLimited(wait)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(url = url, status = code, "Unauthorized");
                FetchError::Unauthorized
            }
            _ if self.transient_statuses.contains(&code) => {
                warn!(url = url, status = code, "Transient upstream error");
                FetchError::TransientStatus(code)
            }
            _ => {
                warn!(url = url, status = code, "Unexpected status");
                FetchError::Status(code)
            }
        }
    }

    /// Get the retry manager
    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }
}

fn map_send_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::NetworkTimeout
    } else {
        FetchError::Network(e.to_string())
    }
}

/// Delay-seconds form of a Retry-After header
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
