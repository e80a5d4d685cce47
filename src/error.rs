//! Application error types for formsync
//!
//! This module defines the error types shared across the sync pipeline.
//! All error types use `thiserror` for ergonomic error handling.
//!
//! Form-scoped errors ([`FetchError`], [`SinkError`]) are captured into the
//! per-form result and never abort a run. [`AuthError`] and
//! [`crate::config::ConfigError`] fail a whole request or the process.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while guarding the trigger endpoint
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// Missing authorization header or unsupported scheme
    #[error("Missing bearer token")]
    MissingAuth,

    /// Bearer token does not match the configured token
    #[error("Invalid token")]
    InvalidToken,

    /// Admission rejected by the sliding-window limiter
    #[error("Too many requests")]
    RateLimited,
}

/// Errors raised while fetching records from the form source
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Request timed out (connect or read)
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a status from the transient set
    #[error("Transient upstream status: HTTP {0}")]
    TransientStatus(u16),

    /// Server answered 429
    #[error("Rate limited by upstream, retry after {0} seconds")]
    RateLimited(u64),

    /// Server answered with a non-transient status
    #[error("Upstream rejected request: HTTP {0}")]
    Status(u16),

    /// Server rejected the source credentials
    #[error("Unauthorized by upstream")]
    Unauthorized,

    /// Body is not a page envelope
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Every attempt failed with a transient error
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the final attempt
        last: Box<FetchError>,
    },

    /// Source kept reporting more pages past the configured ceiling
    #[error("Page limit of {0} exceeded")]
    PageLimitExceeded(u32),

    /// Form did not finish within its wall-clock budget
    #[error("Form sync exceeded its budget of {0} seconds")]
    DeadlineExceeded(u64),
}

/// Errors raised by a table sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Async SQLite connection failure
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// File system failure
    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Table name cannot be used by this sink
    #[error("Invalid table name: {0}")]
    InvalidTable(String),
}

/// Application-level error type
///
/// Aggregates the domain errors for the binary entry point.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Sink error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError: Sized {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;

    /// Minimum wait requested by the upstream before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Wrap the final error once every attempt has been used
    fn exhausted(self, attempts: u32) -> Self;
}

impl RetryableError for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::NetworkTimeout => true,
            FetchError::Network(_) => true,
            FetchError::TransientStatus(_) => true,
            FetchError::RateLimited(_) => true,

            FetchError::Status(_) => false,
            FetchError::Unauthorized => false,
            FetchError::InvalidData(_) => false,
            FetchError::Exhausted { .. } => false,
            FetchError::PageLimitExceeded(_) => false,
            FetchError::DeadlineExceeded(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited(secs) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    fn exhausted(self, attempts: u32) -> Self {
        FetchError::Exhausted {
            attempts,
            last: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Error message formatting
    #[test]
    fn test_auth_error_messages() {
        assert_eq!(AuthError::MissingAuth.to_string(), "Missing bearer token");
        assert_eq!(AuthError::InvalidToken.to_string(), "Invalid token");
        assert_eq!(AuthError::RateLimited.to_string(), "Too many requests");
    }

    // Test 2: FetchError messages with parameters
    #[test]
    fn test_fetch_error_messages() {
        assert_eq!(FetchError::NetworkTimeout.to_string(), "Network timeout");
        assert_eq!(
            FetchError::TransientStatus(503).to_string(),
            "Transient upstream status: HTTP 503"
        );
        assert_eq!(
            FetchError::Status(404).to_string(),
            "Upstream rejected request: HTTP 404"
        );
        assert_eq!(
            FetchError::PageLimitExceeded(1000).to_string(),
            "Page limit of 1000 exceeded"
        );
    }

    // Test 3: Exhausted carries the last cause
    #[test]
    fn test_exhausted_message_includes_last_cause() {
        let err = FetchError::TransientStatus(500).exhausted(5);
        assert_eq!(
            err.to_string(),
            "Retries exhausted after 5 attempts: Transient upstream status: HTTP 500"
        );
        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert_eq!(*last, FetchError::TransientStatus(500));
            }
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    // Test 4: RetryableError classification
    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::NetworkTimeout.is_retryable());
        assert!(FetchError::Network("reset".to_string()).is_retryable());
        assert!(FetchError::TransientStatus(502).is_retryable());
        assert!(FetchError::RateLimited(10).is_retryable());

        assert!(!FetchError::Status(400).is_retryable());
        assert!(!FetchError::Unauthorized.is_retryable());
        assert!(!FetchError::InvalidData("html".to_string()).is_retryable());
        assert!(!FetchError::PageLimitExceeded(3).is_retryable());
        assert!(!FetchError::DeadlineExceeded(60).is_retryable());
        assert!(!FetchError::NetworkTimeout.exhausted(5).is_retryable());
    }

    // Test 5: Retry-After only comes from upstream rate limiting
    #[test]
    fn test_retry_after_hint() {
        assert_eq!(
            FetchError::RateLimited(7).retry_after(),
            Some(Duration::from_secs(7))
        );
        assert_eq!(FetchError::TransientStatus(503).retry_after(), None);
    }

    // Test 6: From conversions for AppError
    #[test]
    fn test_app_error_from_domain_errors() {
        let app_err: AppError = AuthError::InvalidToken.into();
        assert!(matches!(app_err, AppError::Auth(AuthError::InvalidToken)));

        let app_err: AppError = FetchError::Unauthorized.into();
        assert_eq!(app_err.to_string(), "Fetch error: Unauthorized by upstream");

        let app_err: AppError = ConfigError::MissingRequired("auth.token".to_string()).into();
        assert_eq!(
            app_err.to_string(),
            "Configuration error: Missing required configuration: auth.token"
        );
    }

    // Test 7: SinkError from IO error
    #[test]
    fn test_sink_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let sink_err: SinkError = io_err.into();
        assert!(matches!(sink_err, SinkError::Io(_)));
        assert_eq!(sink_err.to_string(), "Sink IO error: denied");
    }

    // Test 8: SinkError from rusqlite::Error
    #[test]
    fn test_sink_error_from_sqlite() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("x".to_string());
        let sink_err: SinkError = sqlite_err.into();
        assert!(matches!(sink_err, SinkError::Database(_)));
    }
}
