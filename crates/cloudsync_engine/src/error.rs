//! Error types for the control loops.

use cloudsync_ledger::{EntryState, LedgerError};
use cloudsync_storage::StorageError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while starting or running a synchronization loop.
#[derive(Error, Debug)]
pub enum SyncError {
    /// `mode` was missing or not exactly `source` / `sink`.
    #[error("invalid mode {0:?}, provide source or sink")]
    InvalidMode(String),

    /// A required start parameter was absent.
    #[error("missing start parameter: {0}")]
    MissingParameter(&'static str),

    /// The start request could not be understood.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The repository plugin for the requested store is not loaded.
    #[error("plugin not found: {0}")]
    PluginMissing(String),

    /// The repository is not registered and could not be registered.
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// The cluster refused to export a collection.
    #[error("export of {collection} rejected: {reason}")]
    ExportRejected {
        /// Collection being exported.
        collection: String,
        /// Reason given by the cluster.
        reason: String,
    },

    /// A call to the cluster failed.
    #[error("cluster error: {message}")]
    Cluster {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// A restored collection did not become healthy in time.
    #[error("collection {collection} not healthy after {waited:?}")]
    HealthTimeout {
        /// Restored collection.
        collection: String,
        /// How long the sink waited.
        waited: Duration,
    },

    /// A ledger update would move a collection back to an earlier state.
    #[error("collection {collection} cannot move from {from} back to {to}")]
    StateRegression {
        /// Collection being updated.
        collection: String,
        /// State in the ledger.
        from: EntryState,
        /// Requested state.
        to: EntryState,
    },

    /// No ledger exists (status is only valid on the source cluster).
    #[error("no valid cloudsync state found, status is only available on the source cluster")]
    NoLedger,

    /// The loop was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A loop thread died unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),

    /// Ledger store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ledger codec error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Creates a retryable cluster error.
    pub fn cluster_retryable(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable cluster error.
    pub fn cluster_fatal(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error is expected steady-state noise that the
    /// loops may retry on their own cadence.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Cluster { retryable, .. } => *retryable,
            SyncError::HealthTimeout { .. } => true,
            SyncError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
