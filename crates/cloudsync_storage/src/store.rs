//! Ledger store trait definition.

use crate::error::StorageResult;
use std::sync::Arc;

/// Durable home of the ledger document for one synchronization run.
///
/// Stores hold exactly one document. Writers replace it wholesale; there is
/// no append or partial update.
///
/// # Invariants
///
/// - `read` returns the last document passed to a successful `write`
/// - `read` returns `None` when nothing was ever written (or after `delete`)
/// - `write` fails unless `ensure_exists` has succeeded at least once
/// - A `write` that returns `Ok` is durable
///
/// # Implementors
///
/// - [`super::InMemoryLedgerStore`] - For testing
/// - [`super::FileLedgerStore`] - For persistent storage
pub trait LedgerStore: Send + Sync {
    /// Reads the current document.
    ///
    /// Returns `None` if the location does not exist or holds no document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be read.
    fn read(&self) -> StorageResult<Option<String>>;

    /// Replaces the stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the location was never created or the write
    /// could not be made durable.
    fn write(&self, document: &str) -> StorageResult<()>;

    /// Creates the backing location if it is absent. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be created.
    fn ensure_exists(&self) -> StorageResult<()>;

    /// Returns true if the backing location exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self) -> StorageResult<bool>;

    /// Removes the stored document.
    ///
    /// Returns true if a document was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be removed.
    fn delete(&self) -> StorageResult<bool>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn read(&self) -> StorageResult<Option<String>> {
        (**self).read()
    }

    fn write(&self, document: &str) -> StorageResult<()> {
        (**self).write(document)
    }

    fn ensure_exists(&self) -> StorageResult<()> {
        (**self).ensure_exists()
    }

    fn exists(&self) -> StorageResult<bool> {
        (**self).exists()
    }

    fn delete(&self) -> StorageResult<bool> {
        (**self).delete()
    }
}
