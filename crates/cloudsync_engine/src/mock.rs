//! In-memory cluster for testing.

use crate::cluster::{
    has_prefix, Acceptance, CollectionCatalog, HealthStatus, RepositorySettings,
    SnapshotRepository,
};
use crate::error::{SyncError, SyncResult};
use crate::pattern::NamePattern;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// An artifact held by the shared mock repository.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredArtifact {
    collection: String,
    size_in_bytes: u64,
}

/// Artifacts per repository name. Shared between clusters that see the
/// same blob store.
type ArtifactStore = Arc<Mutex<BTreeMap<String, BTreeMap<String, StoredArtifact>>>>;

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, u64>,
    repositories: BTreeMap<String, RepositorySettings>,
    plugins: BTreeSet<String>,
    /// Remaining `Yellow` polls per restored collection.
    recovering: HashMap<String, u32>,
    health_delay: u32,
    reject_exports: Option<String>,
    reject_restores: Option<String>,
    refuse_repositories: bool,
}

/// A cluster kept entirely in memory.
///
/// Two mock clusters built with [`sharing_repository`](Self::sharing_repository)
/// see the same artifacts, which is how a source and a sink are wired
/// together in tests. Every call is recorded for later inspection.
#[derive(Debug)]
pub struct MockCluster {
    state: Mutex<State>,
    artifacts: ArtifactStore,
    connected: AtomicBool,
    failures: AtomicU32,
    calls: Mutex<Vec<String>>,
}

impl MockCluster {
    /// Creates an empty, connected cluster.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            artifacts: Arc::new(Mutex::new(BTreeMap::new())),
            connected: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a cluster holding the given collections.
    pub fn with_collections<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let cluster = Self::new();
        for (name, size) in collections {
            cluster.add_collection(name, size);
        }
        cluster
    }

    /// Creates an empty cluster that shares this cluster's artifact store.
    ///
    /// Repository registrations are per cluster, as in a real deployment.
    pub fn sharing_repository(&self) -> Self {
        Self {
            artifacts: Arc::clone(&self.artifacts),
            ..Self::new()
        }
    }

    /// Adds or resizes a collection.
    pub fn add_collection(&self, name: impl Into<String>, size_in_bytes: u64) {
        self.state.lock().collections.insert(name.into(), size_in_bytes);
    }

    /// Names of the collections currently held.
    pub fn collections(&self) -> Vec<String> {
        self.state.lock().collections.keys().cloned().collect()
    }

    /// Marks a plugin as loaded.
    pub fn add_plugin(&self, plugin: impl Into<String>) {
        self.state.lock().plugins.insert(plugin.into());
    }

    /// Registers a repository without going through the call log.
    pub fn register_repository(&self, repository: impl Into<String>, settings: RepositorySettings) {
        self.state
            .lock()
            .repositories
            .insert(repository.into(), settings);
    }

    /// Places an artifact in the shared repository directly.
    pub fn put_artifact(&self, repository: &str, artifact: &str, collection: &str, size: u64) {
        self.artifacts
            .lock()
            .entry(repository.to_string())
            .or_default()
            .insert(
                artifact.to_string(),
                StoredArtifact {
                    collection: collection.to_string(),
                    size_in_bytes: size,
                },
            );
    }

    /// Names of the artifacts resident in `repository`.
    pub fn artifacts(&self, repository: &str) -> Vec<String> {
        self.artifacts
            .lock()
            .get(repository)
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of `Yellow` health polls a restored collection reports before
    /// turning `Green`. `u32::MAX` keeps it yellow for good.
    pub fn set_health_delay(&self, polls: u32) {
        self.state.lock().health_delay = polls;
    }

    /// Turns a restored collection green on its next health check.
    pub fn finish_recovery(&self, collection: &str) {
        self.state.lock().recovering.remove(collection);
    }

    /// Rejects every export with `reason`, or accepts again with `None`.
    pub fn set_reject_exports(&self, reason: Option<&str>) {
        self.state.lock().reject_exports = reason.map(str::to_string);
    }

    /// Rejects every restore with `reason`, or accepts again with `None`.
    pub fn set_reject_restores(&self, reason: Option<&str>) {
        self.state.lock().reject_restores = reason.map(str::to_string);
    }

    /// Makes repository registration return a negative acknowledgement.
    pub fn set_refuse_repositories(&self, refuse: bool) {
        self.state.lock().refuse_repositories = refuse;
    }

    /// Simulates losing the connection: every call fails with a retryable error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `count` calls fail with a retryable error.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Every call made so far, as `"<operation> <argument>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls whose operation starts with `prefix`.
    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, operation: &str, argument: &str) -> SyncResult<()> {
        self.calls.lock().push(format!("{operation} {argument}"));

        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::cluster_retryable("cluster unreachable"));
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(SyncError::cluster_retryable("transient failure"));
        }
        Ok(())
    }

    fn require_repository(&self, repository: &str) -> SyncResult<()> {
        if self.state.lock().repositories.contains_key(repository) {
            Ok(())
        } else {
            Err(SyncError::cluster_fatal(format!(
                "repository_missing_exception: [{repository}] missing"
            )))
        }
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionCatalog for MockCluster {
    fn list_collections(&self, pattern: &str) -> SyncResult<BTreeMap<String, u64>> {
        self.record("list_collections", pattern)?;
        let pattern = NamePattern::parse(pattern)?;
        Ok(self
            .state
            .lock()
            .collections
            .iter()
            .filter(|(name, _)| pattern.matches(name))
            .map(|(name, size)| (name.clone(), *size))
            .collect())
    }

    fn health(&self, collection: &str) -> SyncResult<HealthStatus> {
        self.record("health", collection)?;
        let mut state = self.state.lock();
        if let Some(remaining) = state.recovering.get_mut(collection) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(HealthStatus::Yellow);
            }
            state.recovering.remove(collection);
        }
        Ok(if state.collections.contains_key(collection) {
            HealthStatus::Green
        } else {
            HealthStatus::Missing
        })
    }
}

impl SnapshotRepository for MockCluster {
    fn has_plugin(&self, plugin: &str) -> SyncResult<bool> {
        self.record("has_plugin", plugin)?;
        Ok(self.state.lock().plugins.contains(plugin))
    }

    fn has_repository(&self, repository: &str) -> SyncResult<bool> {
        self.record("has_repository", repository)?;
        Ok(self.state.lock().repositories.contains_key(repository))
    }

    fn create_repository(
        &self,
        repository: &str,
        settings: &RepositorySettings,
    ) -> SyncResult<bool> {
        self.record("create_repository", repository)?;
        let mut state = self.state.lock();
        if state.refuse_repositories {
            return Ok(false);
        }
        state
            .repositories
            .insert(repository.to_string(), settings.clone());
        Ok(true)
    }

    fn export(&self, repository: &str, artifact: &str, collection: &str) -> SyncResult<Acceptance> {
        self.record("export", artifact)?;
        self.require_repository(repository)?;

        let size = {
            let state = self.state.lock();
            if let Some(reason) = &state.reject_exports {
                return Ok(Acceptance::Rejected(reason.clone()));
            }
            match state.collections.get(collection) {
                Some(size) => *size,
                None => return Ok(Acceptance::Rejected(format!("no such index [{collection}]"))),
            }
        };

        let mut artifacts = self.artifacts.lock();
        let resident = artifacts.entry(repository.to_string()).or_default();
        if resident.contains_key(artifact) {
            return Ok(Acceptance::Rejected(format!(
                "snapshot with the same name [{artifact}] already exists"
            )));
        }
        resident.insert(
            artifact.to_string(),
            StoredArtifact {
                collection: collection.to_string(),
                size_in_bytes: size,
            },
        );
        Ok(Acceptance::Accepted)
    }

    fn list_artifacts(&self, repository: &str) -> SyncResult<Vec<String>> {
        self.record("list_artifacts", repository)?;
        self.require_repository(repository)?;
        Ok(self.artifacts(repository))
    }

    fn count_artifacts(&self, repository: &str, prefix: &str) -> SyncResult<usize> {
        self.record("count_artifacts", repository)?;
        self.require_repository(repository)?;
        Ok(self.artifacts.lock().get(repository).map_or(0, |resident| {
            resident
                .keys()
                .filter(|artifact| has_prefix(artifact, prefix))
                .count()
        }))
    }

    fn restore(&self, repository: &str, artifact: &str) -> SyncResult<Acceptance> {
        self.record("restore", artifact)?;
        self.require_repository(repository)?;

        let stored = match self
            .artifacts
            .lock()
            .get(repository)
            .and_then(|a| a.get(artifact))
        {
            Some(stored) => stored.clone(),
            None => {
                return Ok(Acceptance::Rejected(format!(
                    "snapshot [{repository}:{artifact}] is missing"
                )))
            }
        };

        let mut state = self.state.lock();
        if let Some(reason) = &state.reject_restores {
            return Ok(Acceptance::Rejected(reason.clone()));
        }
        if state.collections.contains_key(&stored.collection) {
            return Ok(Acceptance::Rejected(format!(
                "cannot restore index [{}] because an open index with same name already exists",
                stored.collection
            )));
        }
        let delay = state.health_delay;
        state
            .collections
            .insert(stored.collection.clone(), stored.size_in_bytes);
        state.recovering.insert(stored.collection, delay);
        Ok(Acceptance::Accepted)
    }

    fn delete_artifact(&self, repository: &str, artifact: &str) -> SyncResult<bool> {
        self.record("delete_artifact", artifact)?;
        self.require_repository(repository)?;
        Ok(self
            .artifacts
            .lock()
            .get_mut(repository)
            .and_then(|a| a.remove(artifact))
            .is_some())
    }
}
