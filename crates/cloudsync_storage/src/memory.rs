//! In-memory ledger store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::LedgerStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory ledger store.
///
/// This store keeps the document in memory and is suitable for:
/// - Unit tests
/// - Integration tests of the control loops
/// - Dry runs that don't need persistence
///
/// Writes can be forced to fail with [`set_fail_writes`](Self::set_fail_writes)
/// to exercise the fatal-write paths.
///
/// # Example
///
/// ```rust
/// use cloudsync_storage::{InMemoryLedgerStore, LedgerStore};
///
/// let store = InMemoryLedgerStore::new();
/// assert!(store.write("{}").is_err());
///
/// store.ensure_exists().unwrap();
/// store.write("{}").unwrap();
/// assert_eq!(store.write_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    created: AtomicBool,
    document: RwLock<Option<String>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryLedgerStore {
    /// Creates a new store whose location does not exist yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an existing store holding `document`.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            created: AtomicBool::new(true),
            document: RwLock::new(Some(document.into())),
            ..Self::default()
        }
    }

    /// Makes every following `write` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns a copy of the stored document without going through the trait.
    #[must_use]
    pub fn document(&self) -> Option<String> {
        self.document.read().clone()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn read(&self) -> StorageResult<Option<String>> {
        if !self.created.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.document.read().clone().filter(|doc| !doc.is_empty()))
    }

    fn write(&self, document: &str) -> StorageResult<()> {
        if !self.created.load(Ordering::SeqCst) {
            return Err(StorageError::NotInitialized("memory".into()));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        *self.document.write() = Some(document.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_exists(&self) -> StorageResult<()> {
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn exists(&self) -> StorageResult<bool> {
        Ok(self.created.load(Ordering::SeqCst))
    }

    fn delete(&self) -> StorageResult<bool> {
        Ok(self.document.write().take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_absent() {
        let store = InMemoryLedgerStore::new();
        assert!(!store.exists().unwrap());
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn memory_write_requires_location() {
        let store = InMemoryLedgerStore::new();
        let result = store.write("{}");
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn memory_write_and_read() {
        let store = InMemoryLedgerStore::new();
        store.ensure_exists().unwrap();
        store.write("first").unwrap();
        store.write("second").unwrap();

        assert_eq!(store.read().unwrap().as_deref(), Some("second"));
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn memory_empty_document_reads_as_none() {
        let store = InMemoryLedgerStore::with_document("");
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn memory_injected_failure() {
        let store = InMemoryLedgerStore::with_document("kept");
        store.set_fail_writes(true);

        assert!(store.write("lost").is_err());
        assert_eq!(store.read().unwrap().as_deref(), Some("kept"));

        store.set_fail_writes(false);
        store.write("now").unwrap();
        assert_eq!(store.read().unwrap().as_deref(), Some("now"));
    }

    #[test]
    fn memory_delete() {
        let store = InMemoryLedgerStore::with_document("doc");
        assert!(store.delete().unwrap());
        assert!(!store.delete().unwrap());
        assert_eq!(store.read().unwrap(), None);
        assert!(store.exists().unwrap());
    }
}
