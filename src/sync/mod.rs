//! Synchronization pipeline
//!
//! This module moves form submissions from the remote source into the
//! destination tables.
//!
//! # Components
//!
//! - [`retry`]: Retry manager with exponential backoff for transient failures
//! - [`http_client`]: HTTP client with retries, timeouts and TLS settings
//! - [`source`]: The [`FormSource`] trait and its REST adapter
//! - [`paginator`]: Page-following extraction bounded by pages and time
//! - [`normalize`]: Record flattening and value sanitizing
//! - [`orchestrator`]: Per-form fetch, normalize and replace with a run report
//! - [`scheduler`]: Periodic full runs
//!
//! # Example
//!
//! ```ignore
//! use formsync::sync::{HttpFormSource, Paginator, PaginationLimits, SyncOrchestrator};
//!
//! let source = HttpFormSource::new(&config.source, config.retry.clone())?;
//! let paginator = Paginator::new(Arc::new(source), PaginationLimits::from(&config.source));
//! let orchestrator = SyncOrchestrator::new(paginator, sink, 1);
//!
//! let report = orchestrator.run(forms, CancellationToken::new()).await;
//! ```

pub mod http_client;
pub mod normalize;
pub mod orchestrator;
pub mod paginator;
pub mod retry;
pub mod scheduler;
pub mod source;

// Re-export main types for convenience
pub use http_client::RetryingHttpClient;
pub use normalize::{flatten, normalize};
pub use orchestrator::SyncOrchestrator;
pub use paginator::{PaginationLimits, Paginator};
pub use retry::RetryManager;
pub use scheduler::{SchedulerConfig, SchedulerStatus, SyncScheduler};
pub use source::{FormSource, HttpFormSource};
