//! Sync orchestration
//!
//! The [`SyncOrchestrator`] runs every selected form through fetch,
//! normalization and table replacement, collecting one [`SyncResult`] per
//! form. A failing form never aborts the run.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::{FormSpec, SyncReport, SyncResult};
use crate::otel::SyncMetrics;
use crate::sink::TableSink;
use crate::sync::normalize::normalize;
use crate::sync::paginator::Paginator;

/// Runs full or partial syncs against one sink
pub struct SyncOrchestrator {
    paginator: Paginator,
    sink: Arc<dyn TableSink>,
    max_concurrent_forms: usize,
    run_lock: Mutex<()>,
    metrics: Option<Arc<SyncMetrics>>,
}

impl SyncOrchestrator {
    pub fn new(paginator: Paginator, sink: Arc<dyn TableSink>, max_concurrent_forms: usize) -> Self {
        Self {
            paginator,
            sink,
            max_concurrent_forms: max_concurrent_forms.max(1),
            run_lock: Mutex::new(()),
            metrics: None,
        }
    }

    /// Record form, page and run metrics
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.paginator = self.paginator.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Sync the given forms
    ///
    /// Runs are serialized: a call made while another run is in progress
    /// waits for it. Results keep the order of `forms`. Once `cancel` fires,
    /// forms that have not started are reported as skipped.
    pub async fn run(&self, forms: Vec<FormSpec>, cancel: CancellationToken) -> SyncReport {
        let _guard = self.run_lock.lock().await;
        let started_at = Utc::now();

        info!(
            forms = forms.len(),
            max_concurrent_forms = self.max_concurrent_forms,
            "Sync run started"
        );

        let results: Vec<SyncResult> = stream::iter(forms)
            .map(|form| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        warn!(form = %form.destination_table, "Run cancelled, form skipped");
                        return SyncResult::skipped(&form);
                    }
                    self.sync_form(&form).await
                }
            })
            .buffered(self.max_concurrent_forms)
            .collect()
            .await;

        let report = SyncReport::new(started_at, results);

        info!(
            outcome = %report.outcome,
            forms = report.results.len(),
            "Sync run finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_run(report.outcome);
        }

        report
    }

    async fn sync_form(&self, form: &FormSpec) -> SyncResult {
        let span = info_span!(
            "sync_form",
            form = %form.destination_table,
            source_id = %form.source_id
        );
        let start = Instant::now();

        let result = self.process_form(form).instrument(span).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_form(
                &form.destination_table,
                result.status,
                result.row_count.unwrap_or(0),
                start.elapsed().as_secs_f64(),
            );
        }

        result
    }

    async fn process_form(&self, form: &FormSpec) -> SyncResult {
        let dataset = match self.paginator.fetch_all(form).await {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(error = %e, "Fetch failed, table left untouched");
                return SyncResult::error(form, e);
            }
        };

        let dataset = normalize(dataset);
        let header = dataset.header();
        if dataset.is_empty() || header.is_empty() {
            info!("No records, table left untouched");
            return SyncResult::no_data(form);
        }

        let rows = dataset.rows();
        match self
            .sink
            .replace(&form.destination_table, &header, &rows)
            .await
        {
            Ok(()) => {
                info!(rows = rows.len(), columns = header.len(), "Table replaced");
                SyncResult::success(form, rows.len())
            }
            Err(e) => {
                warn!(error = %e, "Write failed");
                SyncResult::error(form, e)
            }
        }
    }
}
