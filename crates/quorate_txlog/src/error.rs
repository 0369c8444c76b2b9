//! Error types for the transaction log.

use std::io;
use thiserror::Error;

/// Result type for transaction log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in transaction log operations.
///
/// I/O and corruption errors mean the store cannot durably record a
/// transition; the coordinator treats those as fatal for the in-flight
/// transaction. The remaining variants report contract violations
/// (duplicate keys, unknown keys, non-monotonic status updates).
#[derive(Debug, Error)]
pub enum LogError {
    /// The underlying storage is unreachable or failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded for the journal.
    #[error("encode error: {0}")]
    Encode(String),

    /// A journal entry could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The journal is corrupted and must not be trusted.
    #[error("transaction log corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the journal's exclusive lock.
    #[error("transaction log locked: another process has exclusive access")]
    Locked,

    /// A transaction record with this id already exists.
    #[error("duplicate transaction: {transaction_id}")]
    DuplicateTransaction {
        /// The conflicting transaction id.
        transaction_id: u64,
    },

    /// No transaction record exists for this id.
    #[error("transaction not found: {transaction_id}")]
    TransactionNotFound {
        /// The missing transaction id.
        transaction_id: u64,
    },

    /// A branch record for this resource manager already exists.
    #[error("duplicate resource '{resource}' for transaction {transaction_id}")]
    DuplicateResource {
        /// The owning transaction id.
        transaction_id: u64,
        /// The conflicting resource manager name.
        resource: String,
    },

    /// No branch record exists for this resource manager.
    #[error("resource '{resource}' not found for transaction {transaction_id}")]
    ResourceNotFound {
        /// The owning transaction id.
        transaction_id: u64,
        /// The missing resource manager name.
        resource: String,
    },

    /// A status update would move a record backwards.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// A transaction record cannot be deleted while branches are open.
    #[error("transaction {transaction_id} still has outstanding branches")]
    BranchesOutstanding {
        /// The transaction id.
        transaction_id: u64,
    },
}

impl LogError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
