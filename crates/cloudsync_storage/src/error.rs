//! Error types for ledger storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing the ledger.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The ledger location has not been created yet.
    #[error("ledger location does not exist: {0}")]
    NotInitialized(String),

    /// Another process holds the ledger lock.
    #[error("ledger is locked by another process: {0}")]
    Locked(String),

    /// The stored document is not valid UTF-8.
    #[error("ledger corrupted: {0}")]
    Corrupted(String),
}
