//! Filesystem-backed cluster.
//!
//! Layout under the cluster root:
//!
//! ```text
//! <root>/
//! ├─ indices/<name>/...       # Collections; size is the sum of file sizes
//! ├─ .restoring/<name>/       # Restore in flight (health yellow)
//! ├─ repositories.json        # Registered repositories
//! └─ plugins                  # Loaded plugins, one per line (optional)
//! ```
//!
//! An `fs` repository is a directory shared by both clusters:
//!
//! ```text
//! <location>/
//! ├─ snapshot_<name>/
//! │  ├─ artifact.json         # {"collection": ..., "sizeInBytes": ...}
//! │  └─ data/...              # Copy of the collection
//! └─ snapshot_<name>.partial/ # Export in flight, never listed
//! ```

use crate::cluster::{
    Acceptance, CollectionCatalog, HealthStatus, RepositorySettings, SnapshotRepository,
};
use crate::error::{SyncError, SyncResult};
use crate::params::StoreType;
use crate::pattern::NamePattern;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const INDICES_DIR: &str = "indices";
const RESTORING_DIR: &str = ".restoring";
const REPOSITORIES_FILE: &str = "repositories.json";
const REPOSITORIES_TEMP: &str = "repositories.json.tmp";
const PLUGINS_FILE: &str = "plugins";
const MANIFEST_FILE: &str = "artifact.json";
const DATA_DIR: &str = "data";
const PARTIAL_SUFFIX: &str = ".partial";

/// Registration record kept in `repositories.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepositoryRecord {
    #[serde(rename = "type")]
    store: StoreType,
    settings: BTreeMap<String, String>,
}

/// Metadata written next to an artifact's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactManifest {
    collection: String,
    size_in_bytes: u64,
}

/// A cluster whose collections are directories on local disk.
///
/// Only the `fs` store type is backed. Exports become visible to listings
/// through a single rename, so a reader never sees half an artifact.
#[derive(Debug)]
pub struct FsCluster {
    root: PathBuf,
    registry: Mutex<()>,
}

impl FsCluster {
    /// Creates a cluster rooted at `root`. No I/O happens until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registry: Mutex::new(()),
        }
    }

    /// Returns the cluster root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a collection.
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(INDICES_DIR).join(collection)
    }

    fn restoring_path(&self, collection: &str) -> PathBuf {
        self.root.join(RESTORING_DIR).join(collection)
    }

    fn load_repositories(&self) -> SyncResult<BTreeMap<String, RepositoryRecord>> {
        match fs::read_to_string(self.root.join(REPOSITORIES_FILE)) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                SyncError::cluster_fatal(format!("{REPOSITORIES_FILE} is unreadable: {e}"))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_repositories(&self, repositories: &BTreeMap<String, RepositoryRecord>) -> SyncResult<()> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_vec_pretty(repositories)
            .map_err(|e| SyncError::Internal(format!("cannot encode repositories: {e}")))?;

        let temp = self.root.join(REPOSITORIES_TEMP);
        let mut file = File::create(&temp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, self.root.join(REPOSITORIES_FILE))?;
        Ok(())
    }

    /// Resolves the directory of a registered repository.
    fn repository_dir(&self, repository: &str) -> SyncResult<PathBuf> {
        let repositories = self.load_repositories()?;
        let location = repositories
            .get(repository)
            .and_then(|record| record.settings.get("location"))
            .ok_or_else(|| {
                SyncError::cluster_fatal(format!(
                    "repository_missing_exception: [{repository}] missing"
                ))
            })?;
        Ok(self.resolve(location))
    }

    /// Relative repository locations are resolved against the cluster root.
    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn read_manifest(&self, artifact_dir: &Path) -> SyncResult<Option<ArtifactManifest>> {
        match fs::read_to_string(artifact_dir.join(MANIFEST_FILE)) {
            Ok(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
                SyncError::cluster_fatal(format!(
                    "corrupt artifact manifest in {}: {e}",
                    artifact_dir.display()
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CollectionCatalog for FsCluster {
    fn list_collections(&self, pattern: &str) -> SyncResult<BTreeMap<String, u64>> {
        let pattern = NamePattern::parse(pattern)?;
        let mut collections = BTreeMap::new();

        let entries = match fs::read_dir(self.root.join(INDICES_DIR)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(collections),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 collection name");
                continue;
            };
            if pattern.matches(&name) {
                let size = dir_size(&entry.path())?;
                collections.insert(name, size);
            }
        }
        Ok(collections)
    }

    fn health(&self, collection: &str) -> SyncResult<HealthStatus> {
        if !is_plain_name(collection) {
            return Ok(HealthStatus::Missing);
        }
        Ok(if self.collection_path(collection).is_dir() {
            HealthStatus::Green
        } else if self.restoring_path(collection).is_dir() {
            HealthStatus::Yellow
        } else {
            HealthStatus::Missing
        })
    }
}

impl SnapshotRepository for FsCluster {
    fn has_plugin(&self, plugin: &str) -> SyncResult<bool> {
        match fs::read_to_string(self.root.join(PLUGINS_FILE)) {
            Ok(text) => Ok(text.lines().map(str::trim).any(|line| line == plugin)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn has_repository(&self, repository: &str) -> SyncResult<bool> {
        match self.repository_dir(repository) {
            Ok(dir) => Ok(dir.is_dir()),
            Err(SyncError::Cluster { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_repository(
        &self,
        repository: &str,
        settings: &RepositorySettings,
    ) -> SyncResult<bool> {
        if settings.store != StoreType::Fs {
            if let Some(plugin) = settings.store.plugin() {
                if !self.has_plugin(plugin)? {
                    return Err(SyncError::PluginMissing(plugin.to_string()));
                }
            }
            warn!(
                repository,
                store = %settings.store,
                "filesystem cluster only backs fs repositories"
            );
            return Ok(false);
        }

        let _guard = self.registry.lock();
        fs::create_dir_all(self.resolve(&settings.location))?;

        let mut repositories = self.load_repositories()?;
        repositories.insert(
            repository.to_string(),
            RepositoryRecord {
                store: settings.store,
                settings: settings
                    .settings()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            },
        );
        self.save_repositories(&repositories)?;
        Ok(true)
    }

    fn export(&self, repository: &str, artifact: &str, collection: &str) -> SyncResult<Acceptance> {
        if !is_plain_name(artifact) || !is_plain_name(collection) {
            return Ok(Acceptance::Rejected(format!(
                "invalid name [{artifact}] for [{collection}]"
            )));
        }
        let dir = self.repository_dir(repository)?;
        let source = self.collection_path(collection);
        if !source.is_dir() {
            return Ok(Acceptance::Rejected(format!("no such index [{collection}]")));
        }
        let target = dir.join(artifact);
        if target.exists() {
            return Ok(Acceptance::Rejected(format!(
                "snapshot with the same name [{artifact}] already exists"
            )));
        }

        let partial = dir.join(format!("{artifact}{PARTIAL_SUFFIX}"));
        if partial.exists() {
            debug!(path = %partial.display(), "removing stale partial export");
            fs::remove_dir_all(&partial)?;
        }
        fs::create_dir_all(&partial)?;
        copy_dir(&source, &partial.join(DATA_DIR))?;

        let manifest = ArtifactManifest {
            collection: collection.to_string(),
            size_in_bytes: dir_size(&source)?,
        };
        let json = serde_json::to_vec(&manifest)
            .map_err(|e| SyncError::Internal(format!("cannot encode manifest: {e}")))?;
        let mut file = File::create(partial.join(MANIFEST_FILE))?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&partial, &target)?;
        Ok(Acceptance::Accepted)
    }

    fn list_artifacts(&self, repository: &str) -> SyncResult<Vec<String>> {
        let dir = self.repository_dir(repository)?;
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) || !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join(MANIFEST_FILE).is_file() {
                artifacts.push(name);
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }

    fn restore(&self, repository: &str, artifact: &str) -> SyncResult<Acceptance> {
        if !is_plain_name(artifact) {
            return Ok(Acceptance::Rejected(format!("invalid artifact name [{artifact}]")));
        }
        let artifact_dir = self.repository_dir(repository)?.join(artifact);
        let Some(manifest) = self.read_manifest(&artifact_dir)? else {
            return Ok(Acceptance::Rejected(format!(
                "snapshot [{repository}:{artifact}] is missing"
            )));
        };
        let collection = manifest.collection;
        if !is_plain_name(&collection) {
            return Ok(Acceptance::Rejected(format!("invalid index name [{collection}]")));
        }

        let target = self.collection_path(&collection);
        let staging = self.restoring_path(&collection);
        if target.exists() {
            return Ok(Acceptance::Rejected(format!(
                "cannot restore index [{collection}] because an open index with same name already exists"
            )));
        }

        // restores finish within this call, so a staging dir is a leftover
        if staging.exists() {
            debug!(path = %staging.display(), "removing stale restore");
            fs::remove_dir_all(&staging)?;
        }
        if let Err(e) = copy_dir(&artifact_dir.join(DATA_DIR), &staging) {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!(path = %staging.display(), error = %cleanup, "cannot remove failed restore");
            }
            return Err(e);
        }
        fs::create_dir_all(self.root.join(INDICES_DIR))?;
        fs::rename(&staging, &target)?;
        Ok(Acceptance::Accepted)
    }

    fn delete_artifact(&self, repository: &str, artifact: &str) -> SyncResult<bool> {
        if !is_plain_name(artifact) {
            return Ok(false);
        }
        let path = self.repository_dir(repository)?.join(artifact);
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// A single path component that cannot escape its parent directory.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.ends_with(PARTIAL_SUFFIX)
}

/// Total size in bytes of the files beneath `path`.
fn dir_size(path: &Path) -> SyncResult<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total = total.saturating_add(dir_size(&entry.path())?);
        } else if file_type.is_file() {
            total = total.saturating_add(entry.metadata()?.len());
        }
    }
    Ok(total)
}

/// Recursively copies the directory `from` to `to`.
fn copy_dir(from: &Path, to: &Path) -> SyncResult<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = to.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    const REPO: &str = "cloudsync_backup";

    fn write_collection(cluster: &FsCluster, name: &str, bytes: usize) {
        let dir = cluster.collection_path(name);
        fs::create_dir_all(dir.join("segments")).unwrap();
        fs::write(dir.join("segments").join("0.seg"), vec![7u8; bytes]).unwrap();
    }

    fn cluster_with_repo() -> (TempDir, FsCluster) {
        let dir = tempdir().unwrap();
        let cluster = FsCluster::new(dir.path().join("source"));
        let location = dir.path().join("backup");
        let settings = RepositorySettings::new(StoreType::Fs, location.to_string_lossy());
        assert!(cluster.create_repository(REPO, &settings).unwrap());
        (dir, cluster)
    }

    #[test]
    fn lists_collections_with_sizes() {
        let (_dir, cluster) = cluster_with_repo();
        write_collection(&cluster, "logs-a", 100);
        write_collection(&cluster, "logs-b", 40);
        write_collection(&cluster, "metrics", 10);

        let listed = cluster.list_collections("logs-*").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed["logs-a"], 100);
        assert_eq!(listed["logs-b"], 40);
    }

    #[test]
    fn empty_cluster_lists_nothing() {
        let dir = tempdir().unwrap();
        let cluster = FsCluster::new(dir.path());
        assert!(cluster.list_collections("*").unwrap().is_empty());
    }

    #[test]
    fn repository_registration_persists() {
        let (dir, cluster) = cluster_with_repo();
        assert!(cluster.has_repository(REPO).unwrap());
        assert!(!cluster.has_repository("other").unwrap());

        let reopened = FsCluster::new(dir.path().join("source"));
        assert!(reopened.has_repository(REPO).unwrap());
    }

    #[test]
    fn export_publishes_complete_artifact() {
        let (_dir, cluster) = cluster_with_repo();
        write_collection(&cluster, "a", 64);

        assert_eq!(cluster.export(REPO, "snapshot_a", "a").unwrap(), Acceptance::Accepted);
        assert_eq!(cluster.list_artifacts(REPO).unwrap(), vec!["snapshot_a"]);
        assert_eq!(cluster.count_artifacts(REPO, "snapshot_").unwrap(), 1);

        let again = cluster.export(REPO, "snapshot_a", "a").unwrap();
        assert!(matches!(again, Acceptance::Rejected(_)));
    }

    #[test]
    fn export_of_missing_collection_is_rejected() {
        let (_dir, cluster) = cluster_with_repo();
        assert!(matches!(cluster.export(REPO, "snapshot_x", "x").unwrap(), Acceptance::Rejected(_)));
        assert!(matches!(cluster.export(REPO, "../escape", "x").unwrap(), Acceptance::Rejected(_)));
    }

    #[test]
    fn partial_exports_are_not_listed() {
        let (dir, cluster) = cluster_with_repo();
        fs::create_dir_all(dir.path().join("backup").join("snapshot_a.partial")).unwrap();
        assert!(cluster.list_artifacts(REPO).unwrap().is_empty());
    }

    #[test]
    fn restore_into_second_cluster() {
        let (dir, source) = cluster_with_repo();
        write_collection(&source, "a", 64);
        source.export(REPO, "snapshot_a", "a").unwrap();

        let sink = FsCluster::new(dir.path().join("sink"));
        let location = dir.path().join("backup");
        sink.create_repository(REPO, &RepositorySettings::new(StoreType::Fs, location.to_string_lossy()))
            .unwrap();

        assert_eq!(sink.health("a").unwrap(), HealthStatus::Missing);
        assert_eq!(sink.restore(REPO, "snapshot_a").unwrap(), Acceptance::Accepted);
        assert_eq!(sink.health("a").unwrap(), HealthStatus::Green);
        assert_eq!(sink.list_collections("*").unwrap()["a"], 64);

        let again = sink.restore(REPO, "snapshot_a").unwrap();
        assert!(matches!(again, Acceptance::Rejected(_)));

        assert!(sink.delete_artifact(REPO, "snapshot_a").unwrap());
        assert!(!sink.delete_artifact(REPO, "snapshot_a").unwrap());
        assert!(source.list_artifacts(REPO).unwrap().is_empty());
    }

    #[test]
    fn stale_restore_is_replaced() {
        let (dir, source) = cluster_with_repo();
        write_collection(&source, "a", 64);
        source.export(REPO, "snapshot_a", "a").unwrap();

        let sink = FsCluster::new(dir.path().join("sink"));
        let location = dir.path().join("backup");
        sink.create_repository(REPO, &RepositorySettings::new(StoreType::Fs, location.to_string_lossy()))
            .unwrap();
        let stale = sink.restoring_path("a");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("leftover"), b"x").unwrap();
        assert_eq!(sink.health("a").unwrap(), HealthStatus::Yellow);

        assert_eq!(sink.restore(REPO, "snapshot_a").unwrap(), Acceptance::Accepted);
        assert_eq!(sink.health("a").unwrap(), HealthStatus::Green);
        assert!(!stale.exists());
        assert!(!sink.collection_path("a").join("leftover").exists());
        assert_eq!(sink.list_collections("*").unwrap()["a"], 64);
    }

    #[test]
    fn failed_restore_copy_leaves_no_staging() {
        let (dir, source) = cluster_with_repo();
        write_collection(&source, "a", 64);
        source.export(REPO, "snapshot_a", "a").unwrap();
        let data = dir.path().join("backup").join("snapshot_a").join(DATA_DIR);
        fs::remove_dir_all(&data).unwrap();
        fs::write(&data, b"not a directory").unwrap();

        let sink = FsCluster::new(dir.path().join("sink"));
        let location = dir.path().join("backup");
        sink.create_repository(REPO, &RepositorySettings::new(StoreType::Fs, location.to_string_lossy()))
            .unwrap();

        assert!(sink.restore(REPO, "snapshot_a").is_err());
        assert!(!sink.restoring_path("a").exists());
        assert_eq!(sink.health("a").unwrap(), HealthStatus::Missing);
    }

    #[test]
    fn restoring_collection_is_yellow() {
        let dir = tempdir().unwrap();
        let cluster = FsCluster::new(dir.path());
        fs::create_dir_all(dir.path().join(RESTORING_DIR).join("a")).unwrap();
        assert_eq!(cluster.health("a").unwrap(), HealthStatus::Yellow);
    }

    #[test]
    fn cloud_store_needs_plugin() {
        let dir = tempdir().unwrap();
        let cluster = FsCluster::new(dir.path());
        let settings = RepositorySettings::new(StoreType::Gcs, "bucket");

        let result = cluster.create_repository(REPO, &settings);
        assert!(matches!(result, Err(SyncError::PluginMissing(_))));

        fs::write(dir.path().join(PLUGINS_FILE), "repository-gcs\n").unwrap();
        assert!(cluster.has_plugin("repository-gcs").unwrap());
        assert!(!cluster.create_repository(REPO, &settings).unwrap());
    }
}
