//! Sliding-window rate limiter for the trigger endpoint
//!
//! Each caller identity keeps the timestamps of its admitted requests inside
//! the trailing window. A request is admitted while fewer than `capacity`
//! timestamps remain in the window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig as RateLimitSettings;

/// Configuration for the rate limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Length of the trailing window
    pub window: Duration,

    /// Requests admitted per identity within one window
    pub capacity: usize,

    /// Maximum number of identities tracked at once
    pub max_identities: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            window: Duration::from_secs(settings.window_secs),
            capacity: settings.capacity,
            max_identities: settings.max_identities,
        }
    }
}

/// Admitted requests of one identity
#[derive(Debug, Clone)]
struct RateWindow {
    hits: VecDeque<Instant>,
    last_seen: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            hits: VecDeque::new(),
            last_seen: now,
        }
    }

    /// Drop timestamps older than `now - window`
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) > window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter keyed by caller identity
///
/// Thread-safe; checks for the same identity are serialized by one mutex.
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new rate limiter with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit or reject a request from `identity` at `now`
    ///
    /// Returns `true` and records the request when admitted.
    pub fn admit(&self, identity: &str, now: Instant) -> bool {
        let mut entries = self.entries();

        if !entries.contains_key(identity) && entries.len() >= self.config.max_identities {
            self.make_room(&mut entries, now);
        }

        let window = entries
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow::new(now));
        window.prune(now, self.config.window);
        window.last_seen = now;

        if window.hits.len() >= self.config.capacity {
            return false;
        }

        window.hits.push_back(now);
        true
    }

    /// Admit or reject a request from `identity` now
    pub fn check(&self, identity: &str) -> bool {
        self.admit(identity, Instant::now())
    }

    /// Time until the request that frees a slot for `identity` reaches the
    /// edge of the window
    ///
    /// Zero when a request would be admitted at `now`.
    pub fn retry_after(&self, identity: &str, now: Instant) -> Duration {
        let entries = self.entries();

        let Some(window) = entries.get(identity) else {
            return Duration::ZERO;
        };

        let live: Vec<Instant> = window
            .hits
            .iter()
            .copied()
            .filter(|t| now.saturating_duration_since(*t) <= self.config.window)
            .collect();

        if live.len() < self.config.capacity {
            return Duration::ZERO;
        }

        // The request that frees a slot is the one `capacity` positions from the end
        let freeing = live[live.len() - self.config.capacity];
        (freeing + self.config.window).saturating_duration_since(now)
    }

    /// Drop identities whose window is empty
    ///
    /// Returns the number of identities removed.
    pub fn cleanup(&self, now: Instant) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        let window = self.config.window;

        entries.retain(|_, entry| {
            entry.prune(now, window);
            !entry.hits.is_empty()
        });

        before - entries.len()
    }

    /// Get current number of tracked identities
    pub fn tracked_count(&self) -> usize {
        self.entries().len()
    }

    /// Purge idle identities, then evict the least recently seen one if
    /// the map is still full
    fn make_room(&self, entries: &mut HashMap<String, RateWindow>, now: Instant) {
        let window = self.config.window;
        entries.retain(|_, entry| {
            entry.prune(now, window);
            !entry.hits.is_empty()
        });

        if entries.len() < self.config.max_identities {
            return;
        }

        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            tracing::debug!(identity = %key, "Evicting rate limit entry");
            entries.remove(&key);
        }
    }
}
