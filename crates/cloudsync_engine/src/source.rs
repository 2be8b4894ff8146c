//! Source control loop.
//!
//! One collection at a time:
//!
//! ```text
//! wait for backlog < bound ─► pick largest READY ─► commit SNAPSHOT_IN_PROGRESS
//!          ▲                                                  │
//!          │                                                  ▼
//!        sleep ◄──────────── commit SNAPSHOTED ◄────────── export
//! ```

use crate::cancel::CancelToken;
use crate::cluster::{Acceptance, CollectionCatalog, SnapshotRepository};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use cloudsync_ledger::{decode, encode, replace, select_ordered, Entry, EntryState};
use cloudsync_storage::LedgerStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Statistics about a source loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Cycles that exported a collection.
    pub exported: u64,
    /// Backlog checks that found the repository full.
    pub backlog_waits: u64,
    /// Retried transient failures of the backlog check.
    pub retries: u64,
    /// Name of the last exported collection.
    pub last_exported: Option<String>,
    /// True once no `READY` entry was left.
    pub completed: bool,
    /// True if the loop stopped because it was cancelled.
    pub cancelled: bool,
    /// The error that stopped the loop, if any.
    pub last_error: Option<String>,
}

/// Result of one non-blocking source cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCycle {
    /// The entry was exported and is now `SNAPSHOTED`.
    Exported(Entry),
    /// The repository holds `resident` artifacts, at or above the bound.
    Backlogged {
        /// Artifacts currently in the repository.
        resident: usize,
    },
    /// No `READY` entry is left.
    Complete,
}

/// Drives the export side of a run.
///
/// The loop owns write access to the ledger for its whole lifetime; only
/// one source loop may run per ledger.
pub struct SourceLoop<C: ?Sized, S: ?Sized> {
    config: SyncConfig,
    cluster: Arc<C>,
    store: Arc<S>,
    cancel: CancelToken,
    stats: RwLock<SourceStats>,
}

impl<C, S> SourceLoop<C, S>
where
    C: CollectionCatalog + SnapshotRepository + ?Sized,
    S: LedgerStore + ?Sized,
{
    /// Creates a source loop over an already recovered ledger.
    pub fn new(config: SyncConfig, cluster: Arc<C>, store: Arc<S>) -> Self {
        Self {
            config,
            cluster,
            store,
            cancel: CancelToken::new(),
            stats: RwLock::new(SourceStats::default()),
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
    pub fn stats(&self) -> SourceStats {
        self.stats.read().clone()
    }

    /// Counts this run's artifacts resident in the repository.
    pub fn backlog(&self) -> SyncResult<usize> {
        self.cluster
            .count_artifacts(&self.config.repository, &self.config.artifact_prefix)
    }

    /// Runs one cycle without blocking on the backlog.
    ///
    /// Completion is checked before the backlog, so a run whose last export
    /// is still resident reports [`SourceCycle::Complete`] instead of waiting.
    ///
    /// # Errors
    ///
    /// Fails on any cluster or ledger error, and with
    /// [`SyncError::ExportRejected`] if the cluster refuses the export.
    pub fn try_cycle(&self) -> SyncResult<SourceCycle> {
        self.cancel.check()?;
        if !self.has_ready()? {
            return Ok(SourceCycle::Complete);
        }

        let resident = self.backlog()?;
        if resident >= self.config.backlog_bound {
            debug!(resident, bound = self.config.backlog_bound, "backlog full");
            return Ok(SourceCycle::Backlogged { resident });
        }

        Ok(match self.export_next()? {
            Some(entry) => SourceCycle::Exported(entry),
            None => SourceCycle::Complete,
        })
    }

    /// Runs until every entry is exported, the loop is cancelled, or a fatal
    /// error occurs.
    ///
    /// Completion and cancellation are `Ok`; the returned statistics tell them
    /// apart.
    pub fn run(&self) -> SyncResult<SourceStats> {
        info!(
            repository = %self.config.repository,
            bound = self.config.backlog_bound,
            "source loop started"
        );

        match self.run_until_done() {
            Ok(()) => {
                info!("all collections exported, source loop finished");
                self.stats.write().completed = true;
            }
            Err(SyncError::Cancelled) => {
                info!("source loop cancelled");
                self.stats.write().cancelled = true;
            }
            Err(e) => {
                error!(error = %e, "source loop stopped");
                self.stats.write().last_error = Some(e.to_string());
                return Err(e);
            }
        }
        Ok(self.stats())
    }

    fn run_until_done(&self) -> SyncResult<()> {
        loop {
            self.cancel.check()?;
            // completion before the gate: a finished run must not wait for the
            // sink to consume its last artifact
            if !self.has_ready()? {
                return Ok(());
            }
            self.wait_for_capacity()?;

            if self.export_next()?.is_none() {
                return Ok(());
            }
            self.cancel.sleep(self.config.cycle_interval)?;
        }
    }

    /// Blocks until fewer than `backlog_bound` artifacts are resident.
    ///
    /// Transient failures of the count are retried with backoff; after
    /// `retry.max_attempts` consecutive failures the last one is returned.
    fn wait_for_capacity(&self) -> SyncResult<usize> {
        let mut failures = 0u32;
        loop {
            self.cancel.check()?;
            match self.backlog() {
                Ok(resident) if resident < self.config.backlog_bound => return Ok(resident),
                Ok(resident) => {
                    failures = 0;
                    self.stats.write().backlog_waits += 1;
                    info!(
                        resident,
                        bound = self.config.backlog_bound,
                        "waiting for the sink to consume artifacts"
                    );
                    self.cancel.sleep(self.config.cycle_interval)?;
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures >= self.config.retry.max_attempts {
                        return Err(e);
                    }
                    self.stats.write().retries += 1;
                    let delay = self.config.retry.delay_for_attempt(failures);
                    warn!(error = %e, attempt = failures, ?delay, "backlog check failed, retrying");
                    self.cancel.sleep(delay)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exports the largest `READY` entry. Returns `None` if none is left.
    fn export_next(&self) -> SyncResult<Option<Entry>> {
        let entries = self.load()?;
        let Some(candidate) = select_ordered(&entries, EntryState::Ready).into_iter().next() else {
            return Ok(None);
        };

        let in_progress = candidate.with_state(EntryState::SnapshotInProgress);
        let entries = self.commit(&entries, &in_progress)?;

        let artifact = self.config.artifact_name(&candidate.name);
        info!(
            collection = %candidate.name,
            %artifact,
            size_in_bytes = candidate.size_in_bytes,
            "exporting collection"
        );
        match self
            .cluster
            .export(&self.config.repository, &artifact, &candidate.name)?
        {
            Acceptance::Accepted => {}
            Acceptance::Rejected(reason) => {
                return Err(SyncError::ExportRejected {
                    collection: candidate.name,
                    reason,
                })
            }
        }

        let done = candidate.with_state(EntryState::Snapshoted);
        self.commit(&entries, &done)?;
        info!(collection = %done.name, "collection exported");

        let mut stats = self.stats.write();
        stats.exported += 1;
        stats.last_exported = Some(done.name.clone());
        Ok(Some(done))
    }

    /// Returns true while the ledger still has a `READY` entry.
    fn has_ready(&self) -> SyncResult<bool> {
        Ok(self
            .load()?
            .iter()
            .any(|entry| entry.state == EntryState::Ready))
    }

    fn load(&self) -> SyncResult<Vec<Entry>> {
        Ok(self
            .store
            .read()?
            .map(|document| decode(&document))
            .unwrap_or_default())
    }

    /// Replaces `updated` in `entries` and persists the result.
    ///
    /// States only move forward here; recovery is the one place allowed to
    /// requeue an entry.
    fn commit(&self, entries: &[Entry], updated: &Entry) -> SyncResult<Vec<Entry>> {
        if let Some(current) = entries.iter().find(|entry| entry.name == updated.name) {
            if !current.state.can_advance_to(updated.state) {
                return Err(SyncError::StateRegression {
                    collection: updated.name.clone(),
                    from: current.state,
                    to: updated.state,
                });
            }
        }
        let entries = replace(entries, updated);
        self.store.write(&encode(&entries)?)?;
        debug!(collection = %updated.name, state = %updated.state, "ledger updated");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::RepositorySettings;
    use crate::config::RetryConfig;
    use crate::mock::MockCluster;
    use crate::params::StoreType;
    use cloudsync_ledger::try_decode;
    use cloudsync_storage::InMemoryLedgerStore;
    use std::time::Duration;

    const REPO: &str = "cloudsync_backup";

    fn setup(entries: &[Entry]) -> (Arc<MockCluster>, Arc<InMemoryLedgerStore>) {
        let cluster = MockCluster::new();
        for entry in entries {
            cluster.add_collection(entry.name.clone(), entry.size_in_bytes);
        }
        cluster.register_repository(REPO, RepositorySettings::new(StoreType::Fs, "/backup"));
        let store = InMemoryLedgerStore::with_document(encode(entries).unwrap());
        (Arc::new(cluster), Arc::new(store))
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::new()
            .with_cycle_interval(Duration::from_millis(1))
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(1))
                    .without_jitter(),
            )
    }

    fn ledger(store: &InMemoryLedgerStore) -> Vec<Entry> {
        try_decode(&store.document().unwrap()).unwrap()
    }

    #[test]
    fn cycle_exports_largest_first() {
        let (cluster, store) = setup(&[Entry::ready("b", 50), Entry::ready("a", 100)]);
        let source = SourceLoop::new(fast_config(), cluster.clone(), store.clone());

        let cycle = source.try_cycle().unwrap();

        assert_eq!(
            cycle,
            SourceCycle::Exported(Entry::new("a", 100, EntryState::Snapshoted))
        );
        assert_eq!(cluster.artifacts(REPO), vec!["snapshot_a"]);
        assert_eq!(store.write_count(), 2);
        assert_eq!(ledger(&store)[1].state, EntryState::Snapshoted);
        assert_eq!(ledger(&store)[0].state, EntryState::Ready);
    }

    #[test]
    fn cycle_reports_backlog() {
        let (cluster, store) = setup(&[Entry::ready("a", 100)]);
        cluster.put_artifact(REPO, "snapshot_old", "old", 1);
        let source = SourceLoop::new(fast_config(), cluster.clone(), store.clone());

        assert_eq!(
            source.try_cycle().unwrap(),
            SourceCycle::Backlogged { resident: 1 }
        );
        assert_eq!(store.write_count(), 0);
        assert_eq!(cluster.calls_matching("export"), 0);
    }

    #[test]
    fn foreign_artifacts_do_not_fill_the_backlog() {
        let (cluster, store) = setup(&[Entry::ready("a", 100)]);
        cluster.put_artifact(REPO, "nightly-backup", "a", 100);
        cluster.put_artifact(REPO, "snapshot_", "a", 100);
        let source = SourceLoop::new(fast_config(), cluster.clone(), store);

        assert_eq!(source.backlog().unwrap(), 0);
        assert_eq!(
            source.try_cycle().unwrap(),
            SourceCycle::Exported(Entry::new("a", 100, EntryState::Snapshoted))
        );
        assert_eq!(source.backlog().unwrap(), 1);
    }

    #[test]
    fn larger_bound_allows_more_resident() {
        let (cluster, store) = setup(&[
            Entry::ready("a", 100),
            Entry::ready("b", 50),
            Entry::ready("c", 10),
        ]);
        let source = SourceLoop::new(fast_config().with_backlog_bound(2), cluster, store);

        assert!(matches!(source.try_cycle().unwrap(), SourceCycle::Exported(_)));
        assert!(matches!(source.try_cycle().unwrap(), SourceCycle::Exported(_)));
        assert_eq!(
            source.try_cycle().unwrap(),
            SourceCycle::Backlogged { resident: 2 }
        );
    }

    #[test]
    fn last_export_completes_while_resident() {
        let (cluster, store) = setup(&[Entry::ready("a", 1)]);
        let source = SourceLoop::new(fast_config(), cluster.clone(), store);

        assert!(matches!(source.try_cycle().unwrap(), SourceCycle::Exported(_)));
        assert_eq!(source.try_cycle().unwrap(), SourceCycle::Complete);
        assert_eq!(cluster.artifacts(REPO).len(), 1);
    }

    #[test]
    fn cycle_completes_without_ready_entries() {
        let (cluster, store) = setup(&[Entry::new("a", 1, EntryState::Snapshoted)]);
        let source = SourceLoop::new(fast_config(), cluster, store);

        assert_eq!(source.try_cycle().unwrap(), SourceCycle::Complete);
    }

    #[test]
    fn rejected_export_is_fatal_and_leaves_entry_in_progress() {
        let (cluster, store) = setup(&[Entry::ready("a", 100)]);
        cluster.set_reject_exports(Some("concurrent snapshot running"));
        let source = SourceLoop::new(fast_config(), cluster, store.clone());

        let result = source.run();

        assert!(matches!(result, Err(SyncError::ExportRejected { .. })));
        assert_eq!(ledger(&store)[0].state, EntryState::SnapshotInProgress);
        assert!(source.stats().last_error.is_some());
    }

    #[test]
    fn run_exports_everything_while_drained() {
        let (cluster, store) = setup(&[Entry::ready("a", 3), Entry::ready("b", 2)]);
        let source = SourceLoop::new(fast_config().with_backlog_bound(5), cluster.clone(), store.clone());

        let stats = source.run().unwrap();

        assert!(stats.completed);
        assert_eq!(stats.exported, 2);
        assert_eq!(stats.last_exported.as_deref(), Some("b"));
        assert!(ledger(&store)
            .iter()
            .all(|entry| entry.state == EntryState::Snapshoted));
    }

    #[test]
    fn transient_backlog_failures_are_retried() {
        let (cluster, store) = setup(&[Entry::ready("a", 1)]);
        cluster.fail_next(2);
        let source = SourceLoop::new(fast_config().with_backlog_bound(2), cluster, store);

        let stats = source.run().unwrap();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.exported, 1);
    }

    #[test]
    fn persistent_backlog_failures_stop_the_loop() {
        let (cluster, store) = setup(&[Entry::ready("a", 1)]);
        cluster.set_connected(false);
        let source = SourceLoop::new(fast_config(), cluster.clone(), store);

        let err = source.run().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(cluster.calls_matching("count_artifacts"), 3);
    }

    #[test]
    fn failed_ledger_write_stops_before_export() {
        let (cluster, store) = setup(&[Entry::ready("a", 1)]);
        store.set_fail_writes(true);
        let source = SourceLoop::new(fast_config(), cluster.clone(), store);

        assert!(matches!(source.run(), Err(SyncError::Storage(_))));
        assert_eq!(cluster.calls_matching("export"), 0);
    }

    #[test]
    fn commit_refuses_to_move_backwards() {
        let exported = Entry::new("a", 1, EntryState::Snapshoted);
        let (cluster, store) = setup(&[exported.clone()]);
        let source = SourceLoop::new(fast_config(), cluster, store.clone());

        let err = source
            .commit(&[exported.clone()], &exported.with_state(EntryState::Ready))
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::StateRegression {
                from: EntryState::Snapshoted,
                to: EntryState::Ready,
                ..
            }
        ));
        assert_eq!(store.write_count(), 0);
        assert_eq!(ledger(&store), vec![exported]);
    }

    #[test]
    fn cancelled_loop_stops_cleanly() {
        let (cluster, store) = setup(&[Entry::ready("a", 1)]);
        let source = SourceLoop::new(fast_config(), cluster.clone(), store);
        source.cancel_token().cancel();

        let stats = source.run().unwrap();
        assert!(stats.cancelled);
        assert!(!stats.completed);
        assert!(cluster.calls().is_empty());
    }
}
