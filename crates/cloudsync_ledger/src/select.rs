//! Selection and update policy over ledger entries.

use crate::entry::{Entry, EntryState};

/// Returns the entries in `state`, largest first.
///
/// Exporting big collections first amortizes per-export overhead and surfaces
/// capacity problems early. Equal sizes keep their ledger order.
pub fn select_ordered(entries: &[Entry], state: EntryState) -> Vec<Entry> {
    let mut selected: Vec<Entry> = entries
        .iter()
        .filter(|entry| entry.state == state)
        .cloned()
        .collect();
    // stable: ties stay in ledger order
    selected.sort_by(|a, b| b.size_in_bytes.cmp(&a.size_in_bytes));
    selected
}

/// Returns `entries` with the entry named `updated.name` swapped for `updated`.
///
/// Unknown names are not inserted: the ledger is built once at startup and
/// only ever updated in place afterwards, so the input comes back unchanged.
pub fn replace(entries: &[Entry], updated: &Entry) -> Vec<Entry> {
    entries
        .iter()
        .map(|entry| {
            if entry.name == updated.name {
                updated.clone()
            } else {
                entry.clone()
            }
        })
        .collect()
}

/// Per-state counts and byte totals of a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Number of entries.
    pub total: usize,
    /// Entries in `READY`.
    pub ready: usize,
    /// Entries in `SNAPSHOT_IN_PROGRESS`.
    pub in_progress: usize,
    /// Entries in `SNAPSHOTED`.
    pub snapshoted: usize,
    /// Sum of all entry sizes.
    pub total_bytes: u64,
    /// Sum of `READY` entry sizes.
    pub ready_bytes: u64,
}

/// Counts entries by state.
pub fn tally(entries: &[Entry]) -> Tally {
    entries.iter().fold(Tally::default(), |mut t, entry| {
        t.total += 1;
        t.total_bytes = t.total_bytes.saturating_add(entry.size_in_bytes);
        match entry.state {
            EntryState::Ready => {
                t.ready += 1;
                t.ready_bytes = t.ready_bytes.saturating_add(entry.size_in_bytes);
            }
            EntryState::SnapshotInProgress => t.in_progress += 1,
            EntryState::Snapshoted => t.snapshoted += 1,
        }
        t
    })
}
