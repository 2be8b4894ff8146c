//! Status aggregation over the ledger and the repository listing.

use crate::cluster::SnapshotRepository;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use cloudsync_ledger::{decode, tally, Entry};
use cloudsync_storage::LedgerStore;
use serde::Serialize;

/// Progress of a run as seen from the source cluster.
///
/// Serializes to the JSON status body:
///
/// ```json
/// {
///   "totalIndices": 3,
///   "completedIndices": 1,
///   "pendingIndicesToSnapshot": 1,
///   "pendingIndicesToRestore": 2,
///   "totalSize": "1.4kb",
///   "totalPendingSize": "34b"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Entries in the ledger.
    pub total_indices: usize,
    /// `SNAPSHOTED` entries minus artifacts still resident, floored at zero.
    pub completed_indices: usize,
    /// Entries still `READY`.
    pub pending_indices_to_snapshot: usize,
    /// Entries past `READY`.
    pub pending_indices_to_restore: usize,
    /// Entries stuck or running in `SNAPSHOT_IN_PROGRESS`.
    pub in_progress_indices: usize,
    /// Artifacts of this run resident in the repository.
    pub resident_artifacts: usize,
    /// Human readable total size.
    pub total_size: String,
    /// Human readable size of the `READY` entries.
    pub total_pending_size: String,
    /// Total size in bytes.
    pub total_size_in_bytes: u64,
    /// Size of the `READY` entries in bytes.
    pub total_pending_size_in_bytes: u64,
}

impl StatusReport {
    /// Aggregates ledger entries against the number of resident artifacts.
    ///
    /// `completed_indices` counts exported entries whose artifact is no
    /// longer resident, so an export the sink has not consumed yet is not
    /// completed.
    pub fn compute(entries: &[Entry], resident_artifacts: usize) -> Self {
        let t = tally(entries);
        Self {
            total_indices: t.total,
            completed_indices: t.snapshoted.saturating_sub(resident_artifacts),
            pending_indices_to_snapshot: t.ready,
            pending_indices_to_restore: t.total - t.ready,
            in_progress_indices: t.in_progress,
            resident_artifacts,
            total_size: format_bytes(t.total_bytes),
            total_pending_size: format_bytes(t.ready_bytes),
            total_size_in_bytes: t.total_bytes,
            total_pending_size_in_bytes: t.ready_bytes,
        }
    }
}

/// Computes the status of the run whose ledger lives in `store`.
///
/// # Errors
///
/// Returns [`SyncError::NoLedger`] when there is no ledger, which is the
/// case everywhere but on the source cluster.
pub fn status<R, S>(config: &SyncConfig, cluster: &R, store: &S) -> SyncResult<StatusReport>
where
    R: SnapshotRepository + ?Sized,
    S: LedgerStore + ?Sized,
{
    let document = store.read()?.ok_or(SyncError::NoLedger)?;
    let entries = decode(&document);
    let resident = cluster.count_artifacts(&config.repository, &config.artifact_prefix)?;
    Ok(StatusReport::compute(&entries, resident))
}

const UNITS: [&str; 6] = ["b", "kb", "mb", "gb", "tb", "pb"];

/// Formats a byte count with binary units and at most one decimal,
/// e.g. `100b`, `1.2kb`, `3gb`. The decimal is truncated, not rounded.
pub fn format_bytes(bytes: u64) -> String {
    let mut unit = 0;
    let mut scale: u128 = 1;
    while unit + 1 < UNITS.len() && u128::from(bytes) >= scale * 1024 {
        scale *= 1024;
        unit += 1;
    }

    let tenths = u128::from(bytes) * 10 / scale;
    let (whole, fraction) = (tenths / 10, tenths % 10);
    if fraction == 0 {
        format!("{whole}{}", UNITS[unit])
    } else {
        format!("{whole}.{fraction}{}", UNITS[unit])
    }
}
