//! Paginated extraction of one form type
//!
//! The [`Paginator`] follows pages from offset 0 until the source reports no
//! further page. It is bounded by a page ceiling and a wall-clock budget;
//! any error discards what was accumulated so far.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::models::{Dataset, FormSpec};
use crate::otel::SyncMetrics;
use crate::sync::normalize::flatten;
use crate::sync::source::FormSource;

/// Bounds applied to one form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationLimits {
    /// Records requested per page
    pub page_size: u32,
    /// Maximum number of pages
    pub max_pages: u32,
    /// Wall-clock budget for the whole form
    pub budget: Duration,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self::from(&SourceConfig::default())
    }
}

impl From<&SourceConfig> for PaginationLimits {
    fn from(config: &SourceConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_pages: config.max_pages,
            budget: Duration::from_secs(config.form_budget_secs),
        }
    }
}

/// Drives page fetches for one form at a time
#[derive(Clone)]
pub struct Paginator {
    source: Arc<dyn FormSource>,
    limits: PaginationLimits,
    metrics: Option<Arc<SyncMetrics>>,
}

impl Paginator {
    pub fn new(source: Arc<dyn FormSource>, limits: PaginationLimits) -> Self {
        Self {
            source,
            limits,
            metrics: None,
        }
    }

    /// Count fetched pages
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn limits(&self) -> &PaginationLimits {
        &self.limits
    }

    /// Fetch every record of a form
    pub async fn fetch_all(&self, form: &FormSpec) -> Result<Dataset, FetchError> {
        match tokio::time::timeout(self.limits.budget, self.collect_pages(form)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    form = %form.destination_table,
                    budget_secs = self.limits.budget.as_secs(),
                    "Form exceeded its time budget"
                );
                Err(FetchError::DeadlineExceeded(self.limits.budget.as_secs()))
            }
        }
    }

    async fn collect_pages(&self, form: &FormSpec) -> Result<Dataset, FetchError> {
        let mut dataset = Dataset::new();
        let mut offset = 0u64;
        let mut pages = 0u32;

        loop {
            if pages >= self.limits.max_pages {
                warn!(
                    form = %form.destination_table,
                    max_pages = self.limits.max_pages,
                    "Page limit reached while source still reports more pages"
                );
                return Err(FetchError::PageLimitExceeded(self.limits.max_pages));
            }

            let page = self
                .source
                .fetch_page(&form.source_id, self.limits.page_size, offset)
                .await?;
            pages += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_page(&form.destination_table);
            }

            debug!(
                form = %form.destination_table,
                offset = offset,
                records = page.records.len(),
                has_next = page.has_next,
                "Page fetched"
            );

            for object in &page.records {
                dataset.push(flatten(object));
            }

            if !page.has_next {
                return Ok(dataset);
            }
            offset += u64::from(self.limits.page_size);
        }
    }
}
