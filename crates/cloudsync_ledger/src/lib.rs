//! # Cloudsync Ledger
//!
//! The synchronization ledger: one [`Entry`] per collection being migrated,
//! persisted as a single JSON document of the form
//!
//! ```json
//! {"name": "cloudsync", "snapshots": [
//!   {"name": "logs-2019-01-03", "sizeInBytes": 1234, "state": "READY"}
//! ]}
//! ```
//!
//! This is a pure data crate with no I/O. It provides:
//! - [`Entry`] and [`EntryState`]
//! - [`encode`] / [`decode`] for the ledger document
//! - [`select_ordered`] and [`replace`] for the control loops
//!
//! ## Key Invariants
//!
//! - Exactly one entry per collection name
//! - States only advance `READY → SNAPSHOT_IN_PROGRESS → SNAPSHOTED`
//! - Decoding never fails: an absent or unreadable ledger is "no prior state"

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod entry;
mod error;
mod select;

pub use codec::{decode, encode, from_sizes, try_decode, LEDGER_NAME};
pub use entry::{Entry, EntryState};
pub use error::{LedgerError, LedgerResult};
pub use select::{replace, select_ordered, tally, Tally};
