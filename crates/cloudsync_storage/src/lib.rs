//! # Cloudsync Storage
//!
//! Ledger store trait and implementations for cloudsync.
//!
//! The ledger is a single document describing the synchronization state of
//! one run. Stores are **opaque document stores** - they persist the encoded
//! ledger verbatim and never interpret it.
//!
//! ## Design Principles
//!
//! - One document per store, replaced as a whole on every write
//! - A failed write is always reported, never swallowed
//! - Must be `Send + Sync` so a running loop and a status query can share it
//! - The ledger codec lives in `cloudsync_ledger`, not here
//!
//! ## Available Stores
//!
//! - [`InMemoryLedgerStore`] - For testing and ephemeral runs
//! - [`FileLedgerStore`] - Persistent store at `<root>/.cloudsync/1.json`
//!
//! ## Example
//!
//! ```rust
//! use cloudsync_storage::{InMemoryLedgerStore, LedgerStore};
//!
//! let store = InMemoryLedgerStore::new();
//! store.ensure_exists().unwrap();
//! store.write(r#"{"name":"cloudsync","snapshots":[]}"#).unwrap();
//! assert!(store.read().unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::{FileLedgerStore, LedgerLock};
pub use memory::InMemoryLedgerStore;
pub use store::LedgerStore;
