//! Retry manager for handling transient failures with exponential backoff
//!
//! This module provides a retry mechanism with configurable backoff strategy,
//! jitter, and a bound on the total number of attempts.

use crate::config::RetryConfig;
use crate::error::RetryableError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry manager with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    /// Create a new RetryManager with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a RetryManager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Execute an async operation with retry logic
    ///
    /// The operation runs at most `max_attempts` times. A retryable error
    /// waits for the backoff of the failed attempt, or longer when the error
    /// carries a retry-after hint, before the next attempt. A non-retryable
    /// error is returned as is; a retryable error on the final attempt is
    /// returned through [`RetryableError::exhausted`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempt >= max_attempts {
                        warn!(
                            attempts = attempt,
                            max_attempts = max_attempts,
                            error = %err,
                            "Max retry attempts exhausted"
                        );
                        return Err(err.exhausted(attempt));
                    }

                    let backoff = self.delay_for(attempt, err.retry_after());
                    debug!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Calculate backoff duration after a failed attempt (1-based)
    ///
    /// Uses exponential backoff: initial_backoff * multiplier^(attempt - 1)
    /// Capped at max_backoff_ms with optional jitter
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powi(exponent);
        let capped = base.min(self.config.max_backoff_ms as f64);

        let delay = if self.config.jitter {
            // Add jitter: 50-100% of the calculated backoff
            let jitter = rand::thread_rng().gen_range(0.5..1.0);
            capped * jitter
        } else {
            capped
        };

        Duration::from_secs_f64(delay / 1000.0)
    }

    /// Backoff honoring a retry-after hint, still capped at max_backoff_ms
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.calculate_backoff(attempt);
        match retry_after {
            Some(hint) if hint > backoff => {
                hint.min(Duration::from_millis(self.config.max_backoff_ms))
            }
            _ => backoff,
        }
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
