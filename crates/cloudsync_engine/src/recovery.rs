//! Startup recovery for the source side.

use crate::cluster::{CollectionCatalog, SnapshotRepository};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use cloudsync_ledger::{decode, encode, from_sizes, replace, select_ordered, Entry, EntryState};
use cloudsync_storage::LedgerStore;
use std::collections::HashSet;
use tracing::{info, warn};

/// What startup recovery decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// A previous ledger still had `READY` entries and was kept.
    Resumed {
        /// Entries left to export.
        ready: usize,
        /// Stuck entries reset to `READY` (only with `requeue_in_progress`).
        requeued: usize,
    },
    /// A fresh ledger was built from the collection catalog.
    Fresh {
        /// Collections matched by the pattern.
        collections: usize,
    },
}

/// Decides whether to resume a previous run or start a new one.
///
/// A stored ledger with at least one `READY` entry always wins over
/// `pattern`: the collections are not enumerated again and the ledger is
/// left as it is. Otherwise the collections matching `pattern` are listed
/// and a fresh all-`READY` ledger replaces whatever was stored.
///
/// With [`SyncConfig::requeue_in_progress`] set, `SNAPSHOT_IN_PROGRESS`
/// entries are repaired first: an entry whose artifact is resident in the
/// repository is marked `SNAPSHOTED`, any other goes back to `READY`. The
/// repository must be registered for this.
///
/// # Errors
///
/// Fails if the ledger cannot be read or written, or the catalog cannot
/// be listed. A failed write leaves the previous document in place.
pub fn recover<C, S>(
    config: &SyncConfig,
    pattern: &str,
    cluster: &C,
    store: &S,
) -> SyncResult<RecoveryOutcome>
where
    C: CollectionCatalog + SnapshotRepository + ?Sized,
    S: LedgerStore + ?Sized,
{
    if let Some(document) = store.read()? {
        let mut entries = decode(&document);

        let requeued = if config.requeue_in_progress {
            requeue_in_progress(config, cluster, store, &mut entries)?
        } else {
            0
        };

        let ready = select_ordered(&entries, EntryState::Ready).len();
        if ready > 0 {
            info!(
                ready,
                total = entries.len(),
                "reusing previous run's indices list, delete the ledger to start fresh"
            );
            return Ok(RecoveryOutcome::Resumed { ready, requeued });
        }

        let stuck = select_ordered(&entries, EntryState::SnapshotInProgress);
        if !stuck.is_empty() {
            warn!(
                stuck = stuck.len(),
                "previous run left entries in SNAPSHOT_IN_PROGRESS, they are dropped from the new run"
            );
        }
    }

    let sizes = cluster.list_collections(pattern)?;
    let entries = from_sizes(sizes);
    if entries.is_empty() {
        warn!(pattern, "no collections match the pattern");
    }

    store.ensure_exists()?;
    store.write(&encode(&entries)?)?;
    info!(pattern, collections = entries.len(), "created fresh ledger");

    Ok(RecoveryOutcome::Fresh {
        collections: entries.len(),
    })
}

/// Repairs stuck entries and persists the result. Returns how many went back
/// to `READY`.
fn requeue_in_progress<C, S>(
    config: &SyncConfig,
    cluster: &C,
    store: &S,
    entries: &mut Vec<Entry>,
) -> SyncResult<usize>
where
    C: SnapshotRepository + ?Sized,
    S: LedgerStore + ?Sized,
{
    let stuck = select_ordered(entries, EntryState::SnapshotInProgress);
    if stuck.is_empty() {
        return Ok(0);
    }

    let resident: HashSet<String> = cluster
        .list_artifacts(&config.repository)?
        .into_iter()
        .collect();

    let mut requeued = 0;
    for entry in stuck {
        let state = if resident.contains(&config.artifact_name(&entry.name)) {
            EntryState::Snapshoted
        } else {
            requeued += 1;
            EntryState::Ready
        };
        info!(collection = %entry.name, %state, "repairing stuck entry");
        *entries = replace(entries, &entry.with_state(state));
    }

    store.write(&encode(entries)?)?;
    Ok(requeued)
}
