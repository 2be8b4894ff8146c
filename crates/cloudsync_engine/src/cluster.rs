//! Cluster abstraction used by the control loops.
//!
//! The loops never talk to a cluster directly; they go through these traits
//! so the same logic runs against the in-memory [`MockCluster`](crate::MockCluster),
//! the [`FsCluster`](crate::FsCluster), or any other control plane.

use crate::error::{SyncError, SyncResult};
use crate::params::StoreType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Outcome of a request the cluster may refuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// The cluster took the request.
    Accepted,
    /// The cluster refused; the string says why.
    Rejected(String),
}

/// Health of a collection in a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully available.
    Green,
    /// Readable, but still recovering.
    Yellow,
    /// Not present in the cluster.
    Missing,
}

impl HealthStatus {
    /// Returns true once the collection can be used.
    pub fn is_ready(&self) -> bool {
        matches!(self, HealthStatus::Green)
    }
}

/// Registration details of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Store backing the repository.
    #[serde(rename = "type")]
    pub store: StoreType,
    /// Directory or bucket.
    pub location: String,
}

impl RepositorySettings {
    /// Creates repository settings.
    pub fn new(store: StoreType, location: impl Into<String>) -> Self {
        Self {
            store,
            location: location.into(),
        }
    }

    /// Store-specific settings as the cluster expects them.
    pub fn settings(&self) -> BTreeMap<&'static str, String> {
        let mut settings = BTreeMap::new();
        match self.store {
            StoreType::Fs => {
                settings.insert("location", self.location.clone());
                settings.insert("compress", "true".to_string());
            }
            StoreType::Gcs | StoreType::S3 => {
                settings.insert("bucket", self.location.clone());
            }
        }
        settings
    }
}

/// Catalog of the collections held by a cluster.
pub trait CollectionCatalog: Send + Sync {
    /// Lists collections matching `pattern` with their current size in bytes.
    fn list_collections(&self, pattern: &str) -> SyncResult<BTreeMap<String, u64>>;

    /// Reports the health of one collection.
    fn health(&self, collection: &str) -> SyncResult<HealthStatus>;
}

/// Snapshot repository management of a cluster.
///
/// All artifact operations are scoped to a named repository that must be
/// registered first.
pub trait SnapshotRepository: Send + Sync {
    /// Returns true if the cluster has `plugin` loaded.
    fn has_plugin(&self, plugin: &str) -> SyncResult<bool>;

    /// Returns true if `repository` is registered and reachable.
    fn has_repository(&self, repository: &str) -> SyncResult<bool>;

    /// Registers `repository`. Returns the cluster's acknowledgement.
    fn create_repository(&self, repository: &str, settings: &RepositorySettings)
        -> SyncResult<bool>;

    /// Exports exactly one collection as `artifact`.
    fn export(&self, repository: &str, artifact: &str, collection: &str)
        -> SyncResult<Acceptance>;

    /// Lists the complete artifacts resident in `repository`.
    fn list_artifacts(&self, repository: &str) -> SyncResult<Vec<String>>;

    /// Counts the complete artifacts in `repository` named `<prefix><collection>`.
    ///
    /// Artifacts that do not carry the prefix belong to someone else and are
    /// not counted.
    fn count_artifacts(&self, repository: &str, prefix: &str) -> SyncResult<usize> {
        Ok(self
            .list_artifacts(repository)?
            .iter()
            .filter(|artifact| has_prefix(artifact, prefix))
            .count())
    }

    /// Restores `artifact` into this cluster.
    fn restore(&self, repository: &str, artifact: &str) -> SyncResult<Acceptance>;

    /// Deletes `artifact`. Returns the cluster's acknowledgement.
    fn delete_artifact(&self, repository: &str, artifact: &str) -> SyncResult<bool>;
}

/// Returns true if `artifact` is `prefix` followed by a non-empty name.
pub(crate) fn has_prefix(artifact: &str, prefix: &str) -> bool {
    artifact.len() > prefix.len() && artifact.starts_with(prefix)
}

/// Everything a control loop needs from a cluster.
pub trait Cluster: CollectionCatalog + SnapshotRepository {}

impl<T: CollectionCatalog + SnapshotRepository + ?Sized> Cluster for T {}

impl<C: CollectionCatalog + ?Sized> CollectionCatalog for Arc<C> {
    fn list_collections(&self, pattern: &str) -> SyncResult<BTreeMap<String, u64>> {
        (**self).list_collections(pattern)
    }

    fn health(&self, collection: &str) -> SyncResult<HealthStatus> {
        (**self).health(collection)
    }
}

impl<R: SnapshotRepository + ?Sized> SnapshotRepository for Arc<R> {
    fn has_plugin(&self, plugin: &str) -> SyncResult<bool> {
        (**self).has_plugin(plugin)
    }

    fn has_repository(&self, repository: &str) -> SyncResult<bool> {
        (**self).has_repository(repository)
    }

    fn create_repository(
        &self,
        repository: &str,
        settings: &RepositorySettings,
    ) -> SyncResult<bool> {
        (**self).create_repository(repository, settings)
    }

    fn export(&self, repository: &str, artifact: &str, collection: &str) -> SyncResult<Acceptance> {
        (**self).export(repository, artifact, collection)
    }

    fn list_artifacts(&self, repository: &str) -> SyncResult<Vec<String>> {
        (**self).list_artifacts(repository)
    }

    fn count_artifacts(&self, repository: &str, prefix: &str) -> SyncResult<usize> {
        (**self).count_artifacts(repository, prefix)
    }

    fn restore(&self, repository: &str, artifact: &str) -> SyncResult<Acceptance> {
        (**self).restore(repository, artifact)
    }

    fn delete_artifact(&self, repository: &str, artifact: &str) -> SyncResult<bool> {
        (**self).delete_artifact(repository, artifact)
    }
}

/// Makes sure `repository` is registered, registering it if needed.
///
/// # Errors
///
/// Returns [`SyncError::RepositoryUnavailable`] if the cluster does not
/// acknowledge the registration.
pub fn ensure_repository<R: SnapshotRepository + ?Sized>(
    cluster: &R,
    repository: &str,
    settings: &RepositorySettings,
) -> SyncResult<()> {
    if cluster.has_repository(repository)? {
        return Ok(());
    }

    info!(
        repository,
        store = %settings.store,
        location = %settings.location,
        "registering repository"
    );
    if cluster.create_repository(repository, settings)? {
        Ok(())
    } else {
        Err(SyncError::RepositoryUnavailable(format!(
            "failed to create repository {repository}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;

    #[test]
    fn fs_settings() {
        let settings = RepositorySettings::new(StoreType::Fs, "/mount/backup").settings();
        assert_eq!(settings["location"], "/mount/backup");
        assert_eq!(settings["compress"], "true");
    }

    #[test]
    fn bucket_settings() {
        let settings = RepositorySettings::new(StoreType::Gcs, "migration-bucket").settings();
        assert_eq!(settings["bucket"], "migration-bucket");
        assert!(!settings.contains_key("location"));
    }

    #[test]
    fn ensure_registers_once() {
        let cluster = MockCluster::new();
        let settings = RepositorySettings::new(StoreType::Fs, "/backup");

        ensure_repository(&cluster, "cloudsync_backup", &settings).unwrap();
        ensure_repository(&cluster, "cloudsync_backup", &settings).unwrap();

        assert!(cluster.has_repository("cloudsync_backup").unwrap());
        assert_eq!(cluster.calls_matching("create_repository"), 1);
    }

    #[test]
    fn ensure_fails_without_ack() {
        let cluster = MockCluster::new();
        cluster.set_refuse_repositories(true);
        let settings = RepositorySettings::new(StoreType::Fs, "/backup");

        let result = ensure_repository(&cluster, "cloudsync_backup", &settings);
        assert!(matches!(result, Err(SyncError::RepositoryUnavailable(_))));
    }

    #[test]
    fn health_readiness() {
        assert!(HealthStatus::Green.is_ready());
        assert!(!HealthStatus::Yellow.is_ready());
        assert!(!HealthStatus::Missing.is_ready());
    }
}
