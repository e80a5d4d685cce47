//! OpenTelemetry integration for formsync
//!
//! This module provides observability through OpenTelemetry, including
//! tracing and sync metrics export to OTLP endpoints, and sets up the
//! `tracing` subscriber used by the whole process.

use crate::config::{LoggingConfig, OtelConfig};
use crate::models::{RunOutcome, SyncStatus};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// OpenTelemetry provider for formsync
///
/// Manages tracing and metrics providers with OTLP export capability.
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Create a new OtelProvider with the given configuration
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let (tracer_provider, meter_provider) = if config.enabled {
            let endpoint = config.endpoint.as_ref().ok_or_else(|| {
                OtelError::Config("OTLP endpoint is required when enabled".into())
            })?;

            let tracer_provider = Self::init_tracer_provider(endpoint, &resource)?;
            let meter_provider = Self::init_meter_provider(endpoint, &resource)?;

            (Some(tracer_provider), meter_provider)
        } else {
            // Use no-op meter provider when disabled
            let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
            (None, meter_provider)
        };

        if let Some(ref tp) = tracer_provider {
            global::set_tracer_provider(tp.clone());
        }

        Ok(Self {
            tracer_provider,
            meter_provider,
            config: config.clone(),
        })
    }

    /// Initialize the tracer provider with OTLP exporter
    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        let trace_config = Config::default()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource.clone());

        let tracer_provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(trace_config)
            .build();

        Ok(tracer_provider)
    }

    /// Initialize the meter provider with OTLP exporter
    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build())
    }

    /// Get a tracer from the provider
    pub fn tracer(&self, name: &'static str) -> opentelemetry_sdk::trace::Tracer {
        match self.tracer_provider {
            Some(ref tp) => tp.tracer(name),
            None => TracerProvider::builder().build().tracer(name),
        }
    }

    /// Get the meter for creating metrics
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    /// Check if OpenTelemetry is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Shutdown the OpenTelemetry providers gracefully
    pub fn shutdown(&self) -> Result<(), OtelError> {
        if let Err(e) = self.meter_provider.shutdown() {
            return Err(OtelError::Shutdown(format!(
                "Meter shutdown failed: {:?}",
                e
            )));
        }

        // Force flush any remaining spans
        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                if let Err(e) = result {
                    return Err(OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)));
                }
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Sync metrics
pub struct SyncMetrics {
    /// Forms processed, by status
    pub forms_total: Counter<u64>,

    /// Rows written to destination tables
    pub rows_written_total: Counter<u64>,

    /// Pages fetched from the source
    pub pages_fetched_total: Counter<u64>,

    /// Runs finished, by outcome
    pub runs_total: Counter<u64>,

    /// Trigger requests rejected, by reason
    pub trigger_rejections_total: Counter<u64>,

    /// Per-form sync duration in seconds
    pub form_duration: Histogram<f64>,
}

impl SyncMetrics {
    /// Create new metrics with the given meter
    pub fn new(meter: &Meter) -> Self {
        let forms_total = meter
            .u64_counter("formsync_forms_total")
            .with_description("Total number of forms processed")
            .init();

        let rows_written_total = meter
            .u64_counter("formsync_rows_written_total")
            .with_description("Total number of rows written to destination tables")
            .init();

        let pages_fetched_total = meter
            .u64_counter("formsync_pages_fetched_total")
            .with_description("Total number of pages fetched from the source")
            .init();

        let runs_total = meter
            .u64_counter("formsync_runs_total")
            .with_description("Total number of sync runs")
            .init();

        let trigger_rejections_total = meter
            .u64_counter("formsync_trigger_rejections_total")
            .with_description("Total number of rejected trigger requests")
            .init();

        let form_duration = meter
            .f64_histogram("formsync_form_duration_seconds")
            .with_description("Form sync duration in seconds")
            .init();

        Self {
            forms_total,
            rows_written_total,
            pages_fetched_total,
            runs_total,
            trigger_rejections_total,
            form_duration,
        }
    }

    /// Record the outcome of one form
    pub fn record_form(&self, form: &str, status: SyncStatus, rows: usize, duration_secs: f64) {
        let attrs = [
            KeyValue::new("form", form.to_string()),
            KeyValue::new("status", status.as_str()),
        ];
        self.forms_total.add(1, &attrs);
        self.form_duration.record(duration_secs, &attrs);
        if rows > 0 {
            self.rows_written_total
                .add(rows as u64, &[KeyValue::new("form", form.to_string())]);
        }
    }

    /// Record a fetched page
    pub fn record_page(&self, form: &str) {
        self.pages_fetched_total
            .add(1, &[KeyValue::new("form", form.to_string())]);
    }

    /// Record a finished run
    pub fn record_run(&self, outcome: RunOutcome) {
        self.runs_total
            .add(1, &[KeyValue::new("outcome", outcome.to_string())]);
    }

    /// Record a rejected trigger request
    pub fn record_rejection(&self, reason: &'static str) {
        self.trigger_rejections_total
            .add(1, &[KeyValue::new("reason", reason)]);
    }
}

/// Build the level filter, letting `RUST_LOG` override the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing subscriber with OpenTelemetry integration
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let fmt_layer = if logging.format.eq_ignore_ascii_case("pretty") {
        tracing_subscriber::fmt::layer().pretty().boxed()
    } else {
        tracing_subscriber::fmt::layer().json().boxed()
    };

    let otel_layer = otel
        .is_enabled()
        .then(|| tracing_opentelemetry::layer().with_tracer(otel.tracer("formsync")));

    tracing_subscriber::registry()
        .with(env_filter(&logging.level))
        .with(otel_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}
