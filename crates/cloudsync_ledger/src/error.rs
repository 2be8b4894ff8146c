//! Error types for the ledger codec.

use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors produced while encoding or strictly decoding a ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The entries could not be serialized.
    #[error("failed to encode ledger: {0}")]
    Encode(#[source] serde_json::Error),

    /// The document is not a valid ledger.
    #[error("failed to decode ledger: {0}")]
    Decode(#[source] serde_json::Error),
}
