//! Sink control loop.
//!
//! The sink keeps no durable state. The repository listing is its work
//! queue: every cycle it restores what is resident, waits for each restored
//! collection to turn healthy and deletes the artifact.

use crate::cancel::CancelToken;
use crate::cluster::{Acceptance, CollectionCatalog, HealthStatus, SnapshotRepository};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Statistics about a sink loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Discovery cycles completed.
    pub cycles: u64,
    /// Collections restored and retired.
    pub restored: u64,
    /// Restores the cluster refused.
    pub skipped: u64,
    /// Restored collections that did not turn healthy in time.
    pub health_timeouts: u64,
    /// Cycles that failed and were retried on the next interval.
    pub failed_cycles: u64,
    /// True if the loop stopped because it was cancelled.
    pub cancelled: bool,
    /// The last cycle error, if any.
    pub last_error: Option<String>,
}

/// Result of one sink cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkCycleResult {
    /// Artifacts listed in the repository.
    pub discovered: usize,
    /// Collections restored, healthy and whose artifact was deleted.
    pub restored: Vec<String>,
    /// Artifacts whose restore was refused; left for the next cycle.
    pub skipped: Vec<String>,
    /// Restored collections still waiting to turn healthy.
    pub pending: Vec<String>,
    /// Artifacts without the run's prefix; never touched.
    pub ignored: Vec<String>,
}

/// Drives the import side of a run.
pub struct SinkLoop<C: ?Sized> {
    config: SyncConfig,
    cluster: Arc<C>,
    cancel: CancelToken,
    stats: RwLock<SinkStats>,
    /// Artifacts restored by this process whose collection is not healthy yet.
    awaiting: Mutex<HashSet<String>>,
}

impl<C> SinkLoop<C>
where
    C: CollectionCatalog + SnapshotRepository + ?Sized,
{
    /// Creates a sink loop.
    pub fn new(config: SyncConfig, cluster: Arc<C>) -> Self {
        Self {
            config,
            cluster,
            cancel: CancelToken::new(),
            stats: RwLock::new(SinkStats::default()),
            awaiting: Mutex::new(HashSet::new()),
        }
    }

    /// Uses `cancel` as the stop signal.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a handle that stops the loop.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> SinkStats {
        self.stats.read().clone()
    }

    /// Runs one discovery cycle over the repository.
    ///
    /// Refused restores and health timeouts are reported in the result and
    /// leave the artifact in place.
    ///
    /// # Errors
    ///
    /// Fails if the repository cannot be listed, a cluster call fails, or
    /// the loop is cancelled.
    pub fn run_cycle(&self) -> SyncResult<SinkCycleResult> {
        self.cancel.check()?;

        let artifacts = self.cluster.list_artifacts(&self.config.repository)?;
        let mut result = SinkCycleResult {
            discovered: artifacts.len(),
            ..SinkCycleResult::default()
        };
        debug!(discovered = artifacts.len(), "listed repository");

        for artifact in artifacts {
            self.cancel.check()?;

            let Some(collection) = self.config.collection_name(&artifact) else {
                debug!(%artifact, "ignoring artifact from another run");
                result.ignored.push(artifact);
                continue;
            };
            let collection = collection.to_string();

            let resuming = self.awaiting.lock().contains(&artifact);
            if !resuming {
                match self.cluster.restore(&self.config.repository, &artifact)? {
                    Acceptance::Accepted => {
                        info!(%collection, %artifact, "restoring collection");
                        self.awaiting.lock().insert(artifact.clone());
                    }
                    Acceptance::Rejected(reason)
                        if self.cluster.health(&collection)? != HealthStatus::Missing =>
                    {
                        // restored by an earlier sink that stopped before retiring it
                        info!(%collection, %artifact, %reason, "collection already present, adopting it");
                        self.awaiting.lock().insert(artifact.clone());
                    }
                    Acceptance::Rejected(reason) => {
                        warn!(%collection, %artifact, %reason, "restore refused, will retry");
                        self.stats.write().skipped += 1;
                        result.skipped.push(artifact);
                        continue;
                    }
                }
            }

            match self.await_ready(&collection) {
                Ok(()) => {}
                Err(SyncError::HealthTimeout { waited, .. }) => {
                    warn!(%collection, ?waited, "collection not healthy yet, keeping artifact");
                    self.stats.write().health_timeouts += 1;
                    result.pending.push(collection);
                    continue;
                }
                Err(e) => return Err(e),
            }

            if !self
                .cluster
                .delete_artifact(&self.config.repository, &artifact)?
            {
                warn!(%artifact, "artifact was already gone");
            }
            self.awaiting.lock().remove(&artifact);
            info!(%collection, %artifact, "collection restored, artifact retired");
            self.stats.write().restored += 1;
            result.restored.push(collection);
        }

        self.stats.write().cycles += 1;
        Ok(result)
    }

    /// Polls the collection's health until it is green.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::HealthTimeout`] once `health_timeout` elapsed.
    pub fn await_ready(&self, collection: &str) -> SyncResult<()> {
        let started = Instant::now();
        loop {
            let health = self.cluster.health(collection)?;
            if health.is_ready() {
                return Ok(());
            }
            debug!(collection, ?health, "waiting for restored collection");

            if let Some(timeout) = self.config.health_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(SyncError::HealthTimeout {
                        collection: collection.to_string(),
                        waited,
                    });
                }
            }
            self.cancel.sleep(self.config.health_poll_interval)?;
        }
    }

    /// Runs until cancelled.
    ///
    /// A failed cycle is logged and retried on the next interval.
    pub fn run(&self) -> SyncResult<SinkStats> {
        info!(repository = %self.config.repository, "sink loop started");

        loop {
            match self.run_cycle() {
                Ok(result) => {
                    if !result.restored.is_empty() {
                        debug!(restored = result.restored.len(), "sink cycle finished");
                    }
                }
                Err(SyncError::Cancelled) => break,
                Err(e) => {
                    if e.is_retryable() {
                        warn!(error = %e, "sink cycle failed, retrying next cycle");
                    } else {
                        error!(error = %e, "sink cycle failed, retrying next cycle");
                    }
                    let mut stats = self.stats.write();
                    stats.failed_cycles += 1;
                    stats.last_error = Some(e.to_string());
                }
            }

            if self.cancel.sleep(self.config.cycle_interval).is_err() {
                break;
            }
        }

        info!("sink loop cancelled");
        self.stats.write().cancelled = true;
        Ok(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::RepositorySettings;
    use crate::mock::MockCluster;
    use crate::params::StoreType;
    use std::thread;
    use std::time::Duration;

    const REPO: &str = "cloudsync_backup";

    fn sink_cluster() -> Arc<MockCluster> {
        let cluster = MockCluster::new();
        cluster.register_repository(REPO, RepositorySettings::new(StoreType::Fs, "/backup"));
        Arc::new(cluster)
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::new()
            .with_cycle_interval(Duration::from_millis(1))
            .with_health_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn restores_and_retires() {
        let cluster = sink_cluster();
        cluster.put_artifact(REPO, "snapshot_a", "a", 100);
        let sink = SinkLoop::new(fast_config(), cluster.clone());

        let result = sink.run_cycle().unwrap();

        assert_eq!(result.discovered, 1);
        assert_eq!(result.restored, vec!["a"]);
        assert!(cluster.artifacts(REPO).is_empty());
        assert_eq!(cluster.collections(), vec!["a"]);
    }

    #[test]
    fn waits_for_health() {
        let cluster = sink_cluster();
        cluster.set_health_delay(3);
        cluster.put_artifact(REPO, "snapshot_a", "a", 100);
        let sink = SinkLoop::new(fast_config(), cluster.clone());

        let result = sink.run_cycle().unwrap();

        assert_eq!(result.restored, vec!["a"]);
        assert_eq!(cluster.calls_matching("health"), 4);
    }

    #[test]
    fn refused_restore_is_skipped() {
        let cluster = sink_cluster();
        cluster.set_reject_restores(Some("cluster read-only"));
        cluster.put_artifact(REPO, "snapshot_a", "a", 100);
        let sink = SinkLoop::new(fast_config(), cluster.clone());

        let result = sink.run_cycle().unwrap();
        assert_eq!(result.skipped, vec!["snapshot_a"]);
        assert_eq!(cluster.artifacts(REPO), vec!["snapshot_a"]);

        cluster.set_reject_restores(None);
        let result = sink.run_cycle().unwrap();
        assert_eq!(result.restored, vec!["a"]);
        assert_eq!(sink.stats().skipped, 1);
    }

    #[test]
    fn existing_collection_is_adopted_and_retired() {
        let cluster = sink_cluster();
        cluster.add_collection("a", 100);
        cluster.put_artifact(REPO, "snapshot_a", "a", 100);
        let sink = SinkLoop::new(fast_config(), cluster.clone());

        let result = sink.run_cycle().unwrap();

        assert_eq!(result.restored, vec!["a"]);
        assert!(result.skipped.is_empty());
        assert!(cluster.artifacts(REPO).is_empty());
        assert_eq!(sink.stats().skipped, 0);
    }

    #[test]
    fn foreign_artifacts_are_ignored() {
        let cluster = sink_cluster();
        cluster.put_artifact(REPO, "nightly-backup", "x", 1);
        let sink = SinkLoop::new(fast_config(), cluster.clone());

        let result = sink.run_cycle().unwrap();
        assert_eq!(result.ignored, vec!["nightly-backup"]);
        assert_eq!(cluster.calls_matching("restore"), 0);
        assert_eq!(cluster.artifacts(REPO), vec!["nightly-backup"]);
    }

    #[test]
    fn health_timeout_keeps_artifact_and_resumes() {
        let cluster = sink_cluster();
        cluster.set_health_delay(u32::MAX);
        cluster.put_artifact(REPO, "snapshot_a", "a", 100);
        let config = fast_config().with_health_timeout(Duration::from_millis(10));
        let sink = SinkLoop::new(config, cluster.clone());

        let result = sink.run_cycle().unwrap();
        assert_eq!(result.pending, vec!["a"]);
        assert_eq!(cluster.artifacts(REPO), vec!["snapshot_a"]);
        assert_eq!(sink.stats().health_timeouts, 1);

        cluster.finish_recovery("a");
        let result = sink.run_cycle().unwrap();
        assert_eq!(result.restored, vec!["a"]);
        assert_eq!(cluster.calls_matching("restore"), 1);
        assert!(cluster.artifacts(REPO).is_empty());
    }

    #[test]
    fn run_survives_failures_until_cancelled() {
        let cluster = sink_cluster();
        cluster.set_connected(false);
        let sink = Arc::new(SinkLoop::new(fast_config(), cluster.clone()));
        let cancel = sink.cancel_token();

        let runner = Arc::clone(&sink);
        let handle = thread::spawn(move || runner.run());

        thread::sleep(Duration::from_millis(30));
        cluster.set_connected(true);
        cluster.put_artifact(REPO, "snapshot_a", "a", 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !cluster.artifacts(REPO).is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        cancel.cancel();

        let stats = handle.join().unwrap().unwrap();
        assert!(stats.cancelled);
        assert!(stats.failed_cycles > 0);
        assert_eq!(stats.restored, 1);
    }
}
