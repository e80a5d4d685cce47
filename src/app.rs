//! Component wiring
//!
//! Builds the sync pipeline and the HTTP state from a validated [`Config`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::{RateLimitConfig, RateLimiter, TriggerAuth};
use crate::config::{Config, ConfigError};
use crate::error::AppError;
use crate::otel::SyncMetrics;
use crate::server::AppState;
use crate::sink::open_sink;
use crate::sync::{HttpFormSource, PaginationLimits, Paginator, SyncOrchestrator};

/// Build the orchestrator: HTTP source, paginator and configured sink
pub async fn build_orchestrator(
    config: &Config,
    metrics: Option<Arc<SyncMetrics>>,
) -> Result<Arc<SyncOrchestrator>, AppError> {
    let source = HttpFormSource::new(&config.source, config.retry.clone())?;
    let paginator = Paginator::new(Arc::new(source), PaginationLimits::from(&config.source));

    let sink = open_sink(&config.sink).await?;
    info!(kind = ?config.sink.kind, path = %config.sink.path, "Sink opened");

    let mut orchestrator =
        SyncOrchestrator::new(paginator, sink, config.sync.max_concurrent_forms);
    if let Some(metrics) = metrics {
        orchestrator = orchestrator.with_metrics(metrics);
    }

    Ok(Arc::new(orchestrator))
}

/// Build the HTTP state around a shared orchestrator
pub fn build_state(
    config: &Config,
    orchestrator: Arc<SyncOrchestrator>,
    metrics: Option<Arc<SyncMetrics>>,
    shutdown: CancellationToken,
) -> Result<AppState, AppError> {
    let token = config
        .auth
        .token
        .as_deref()
        .ok_or_else(|| ConfigError::MissingRequired("auth.token".to_string()))?;
    let auth = TriggerAuth::new(token).map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(AppState {
        orchestrator,
        catalog: Arc::new(config.catalog()),
        auth: Arc::new(auth),
        limiter: Arc::new(RateLimiter::new(RateLimitConfig::from(
            &config.auth.rate_limit,
        ))),
        metrics,
        shutdown,
    })
}

/// Periodically drop idle rate limiter identities until shutdown
pub fn spawn_limiter_cleanup(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval.max(Duration::from_secs(1)));
        timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    let removed = limiter.cleanup(std::time::Instant::now());
                    if removed > 0 {
                        debug!(removed = removed, "Rate limiter cleanup");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SinkConfig, SinkKind};
    use crate::models::{FormSpec, SheetGroup};

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.auth.token = Some("token".to_string());
        config.source.base_url = Some("https://example.org/api/v0.5/form/".to_string());
        config.source.username = Some("user".to_string());
        config.source.api_key = Some("key".to_string());
        config.sink = SinkConfig {
            kind: SinkKind::Csv,
            path: dir.to_string_lossy().into_owned(),
        };
        config.sheets = vec![SheetGroup {
            name: "facility".to_string(),
            forms: vec![FormSpec::new("xmlns-a", "Cleaning")],
        }];
        config
    }

    // Test 1: Pipeline and state build from configuration
    #[tokio::test]
    async fn test_build_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let orchestrator = build_orchestrator(&config, None).await.unwrap();
        let state = build_state(&config, orchestrator, None, CancellationToken::new()).unwrap();

        assert_eq!(state.catalog.form_count(), 1);
        assert_eq!(state.limiter.config().capacity, 10);
        assert!(state.auth.authenticate(Some("Bearer token")).is_ok());
    }

    // Test 2: State requires a trigger token
    #[tokio::test]
    async fn test_build_state_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        let orchestrator = build_orchestrator(&config, None).await.unwrap();
        config.auth.token = None;

        let result = build_state(&config, orchestrator, None, CancellationToken::new());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    // Test 3: Cleanup task drops idle identities and stops on shutdown
    #[tokio::test(start_paused = true)]
    async fn test_limiter_cleanup_task() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(1),
            capacity: 5,
            max_identities: 10,
        }));
        limiter.admit("a", std::time::Instant::now() - Duration::from_secs(5));
        assert_eq!(limiter.tracked_count(), 1);

        let shutdown = CancellationToken::new();
        let handle = spawn_limiter_cleanup(limiter.clone(), Duration::from_secs(60), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
