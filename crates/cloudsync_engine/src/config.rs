//! Configuration for the control loops.

use crate::cluster::has_prefix;
use std::time::{Duration, SystemTime};

/// Repository name used by both clusters.
pub const DEFAULT_REPOSITORY: &str = "cloudsync_backup";
/// Prefix prepended to a collection name to form its artifact name.
pub const DEFAULT_ARTIFACT_PREFIX: &str = "snapshot_";

/// Configuration shared by the source and sink loops.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Repository holding the artifacts.
    pub repository: String,
    /// Artifact name prefix; the sink strips it to recover the collection name.
    pub artifact_prefix: String,
    /// Maximum number of resident artifacts before the source pauses.
    pub backlog_bound: usize,
    /// Sleep between cycles and between backlog checks.
    pub cycle_interval: Duration,
    /// Sleep between health checks of a restored collection.
    pub health_poll_interval: Duration,
    /// Give up waiting for a restored collection after this long.
    pub health_timeout: Option<Duration>,
    /// Reset stuck `SNAPSHOT_IN_PROGRESS` entries to `READY` at startup.
    pub requeue_in_progress: bool,
    /// Retry policy for transient cluster failures.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with the default repository and intervals.
    pub fn new() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            backlog_bound: 1,
            cycle_interval: Duration::from_secs(10),
            health_poll_interval: Duration::from_secs(1),
            health_timeout: None,
            requeue_in_progress: false,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the repository name.
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    /// Sets the artifact prefix.
    pub fn with_artifact_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.artifact_prefix = prefix.into();
        self
    }

    /// Sets the backlog bound. A bound of zero is treated as one.
    pub fn with_backlog_bound(mut self, bound: usize) -> Self {
        self.backlog_bound = bound.max(1);
        self
    }

    /// Sets the cycle interval.
    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    /// Sets the health poll interval.
    pub fn with_health_poll_interval(mut self, interval: Duration) -> Self {
        self.health_poll_interval = interval;
        self
    }

    /// Sets the health timeout.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = Some(timeout);
        self
    }

    /// Enables requeueing of stuck in-progress entries during recovery.
    pub fn with_requeue_in_progress(mut self, requeue: bool) -> Self {
        self.requeue_in_progress = requeue;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Artifact name for a collection.
    pub fn artifact_name(&self, collection: &str) -> String {
        format!("{}{}", self.artifact_prefix, collection)
    }

    /// Collection name recovered from an artifact name.
    ///
    /// Returns `None` for artifacts this run did not produce.
    pub fn collection_name<'a>(&self, artifact: &'a str) -> Option<&'a str> {
        if has_prefix(artifact, &self.artifact_prefix) {
            artifact.get(self.artifact_prefix.len()..)
        } else {
            None
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff policy for transient cluster failures.
///
/// The delay starts at `initial_delay` and doubles with every further
/// consecutive failure, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound of a single delay, before jitter.
    pub max_delay: Duration,
    /// Adds up to 25% of random slack to each delay.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a policy giving up after `max_attempts` consecutive failures.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            add_jitter: true,
        }
    }

    /// Sets the delay after the first failure.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Delay to wait after `failures` consecutive failures.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let doublings = (failures - 1).min(31);
        let delay = self
            .initial_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay);

        if self.add_jitter {
            delay.saturating_add(delay.mul_f64(0.25 * jitter_fraction()))
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// A value in `[0, 1)` taken from the clock's sub-second nanoseconds.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
