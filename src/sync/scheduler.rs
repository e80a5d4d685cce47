//! Scheduled sync runs
//!
//! This module provides a scheduler that periodically triggers a full run
//! of every configured form, with an initial delay and optional jitter so
//! that restarts do not all hit the source at the same moment.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::models::{FormSpec, RunOutcome};
use crate::sync::orchestrator::SyncOrchestrator;

/// Configuration for the sync scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Time between runs
    pub interval: Duration,
    /// Initial delay before the first run
    pub initial_delay: Duration,
    /// Add up to a tenth of the interval of random delay to each run
    pub jitter: bool,
}

impl SchedulerConfig {
    /// Scheduler settings, or `None` when scheduled runs are disabled
    pub fn from_sync(config: &SyncConfig) -> Option<Self> {
        match config.interval_secs {
            Some(secs) if secs > 0 => Some(Self {
                interval: Duration::from_secs(secs),
                initial_delay: Duration::from_secs(config.initial_delay_secs),
                jitter: config.jitter,
            }),
            _ => None,
        }
    }

    fn jitter_delay(&self) -> Duration {
        let max = self.interval.as_secs() / 10;
        if !self.jitter || max == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(rand::thread_rng().gen_range(0..=max))
    }
}

/// Status of scheduled runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStatus {
    /// Completion time of the last scheduled run
    pub last_run: Option<DateTime<Utc>>,
    /// Outcome of the last scheduled run
    pub last_outcome: Option<RunOutcome>,
    /// Number of completed scheduled runs
    pub runs: u64,
    /// Whether a scheduled run is in progress
    pub in_progress: bool,
}

/// Periodic full-run scheduler
///
/// Shares the orchestrator, and therefore its run lock, with the trigger
/// endpoint.
pub struct SyncScheduler {
    config: SchedulerConfig,
    orchestrator: Arc<SyncOrchestrator>,
    forms: Vec<FormSpec>,
    status: Arc<RwLock<SchedulerStatus>>,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    /// Create a new sync scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Scheduler configuration
    /// * `orchestrator` - Orchestrator performing the runs
    /// * `forms` - Forms synced by every run
    /// * `shutdown` - Token cancelled on process shutdown
    pub fn new(
        config: SchedulerConfig,
        orchestrator: Arc<SyncOrchestrator>,
        forms: Vec<FormSpec>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            orchestrator,
            forms,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            shutdown,
        }
    }

    /// Shared view of the scheduler status
    pub fn status(&self) -> Arc<RwLock<SchedulerStatus>> {
        self.status.clone()
    }

    /// Run the scheduler until shutdown
    pub async fn run(self) {
        info!(
            forms = self.forms.len(),
            interval_secs = self.config.interval.as_secs(),
            "Starting sync scheduler"
        );

        if !self.config.initial_delay.is_zero() {
            debug!(
                delay_secs = self.config.initial_delay.as_secs(),
                "Waiting for initial delay"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Sync scheduler stopped before first run");
                    return;
                }
                _ = tokio::time::sleep(self.config.initial_delay) => {}
            }
        }

        self.perform_run().await;

        let start = Instant::now() + self.config.interval;
        let mut timer = interval_at(start, self.config.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    break;
                }
                _ = timer.tick() => {
                    let jitter = self.config.jitter_delay();
                    if !jitter.is_zero() {
                        debug!(jitter_secs = jitter.as_secs(), "Delaying scheduled run");
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(jitter) => {}
                        }
                    }
                    self.perform_run().await;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn perform_run(&self) {
        info!("Performing scheduled sync");
        self.status.write().await.in_progress = true;

        let report = self
            .orchestrator
            .run(self.forms.clone(), self.shutdown.child_token())
            .await;

        if report.outcome != RunOutcome::Success {
            warn!(outcome = %report.outcome, message = %report.message, "Scheduled sync incomplete");
        }

        let mut status = self.status.write().await;
        status.in_progress = false;
        status.last_run = Some(report.finished_at);
        status.last_outcome = Some(report.outcome);
        status.runs += 1;
    }
}
