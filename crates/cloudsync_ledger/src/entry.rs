//! Ledger entries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Synchronization state of one collection.
///
/// On the source side states only move forward:
/// `Ready → SnapshotInProgress → Snapshoted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    /// Discovered, not exported yet.
    #[serde(rename = "READY")]
    Ready,
    /// Export requested; the ledger was committed before the export call.
    #[serde(rename = "SNAPSHOT_IN_PROGRESS")]
    SnapshotInProgress,
    /// Export confirmed.
    #[serde(rename = "SNAPSHOTED")]
    Snapshoted,
}

impl EntryState {
    /// Returns the persisted name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Ready => "READY",
            EntryState::SnapshotInProgress => "SNAPSHOT_IN_PROGRESS",
            EntryState::Snapshoted => "SNAPSHOTED",
        }
    }

    /// Returns true if moving from `self` to `to` does not regress.
    pub fn can_advance_to(&self, to: EntryState) -> bool {
        self.rank() <= to.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            EntryState::Ready => 0,
            EntryState::SnapshotInProgress => 1,
            EntryState::Snapshoted => 2,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One collection's record in the ledger.
///
/// `size_in_bytes` is measured once, when the collection is discovered, and
/// is only used for ordering and reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Collection name (unique key).
    pub name: String,
    /// Size at discovery time.
    pub size_in_bytes: u64,
    /// Current state.
    pub state: EntryState,
}

impl Entry {
    /// Creates a new entry.
    pub fn new(name: impl Into<String>, size_in_bytes: u64, state: EntryState) -> Self {
        Self {
            name: name.into(),
            size_in_bytes,
            state,
        }
    }

    /// Creates a freshly discovered entry.
    pub fn ready(name: impl Into<String>, size_in_bytes: u64) -> Self {
        Self::new(name, size_in_bytes, EntryState::Ready)
    }

    /// Returns a copy of this entry in `state`.
    #[must_use]
    pub fn with_state(&self, state: EntryState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}
