//! Error types for the transaction coordinator.

use crate::resource::ResourceError;
use quorate_txlog::LogError;
use std::fmt;
use thiserror::Error;

/// Result type for coordinator operations.
pub type TxResult<T> = Result<T, TxError>;

/// One branch's failure during a commit or rollback sweep.
#[derive(Debug)]
pub struct BranchFailure {
    /// Name of the resource manager whose branch failed.
    pub resource: String,
    /// The underlying resource manager error.
    pub error: ResourceError,
}

impl fmt::Display for BranchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource '{}': {}", self.resource, self.error)
    }
}

/// Errors that can occur while coordinating a transaction.
#[derive(Debug, Error)]
pub enum TxError {
    /// The transaction log could not durably record a transition.
    ///
    /// Fatal to the in-flight transaction: the coordinator never proceeds
    /// past an unlogged state change. The transaction is left for recovery
    /// once the store is reachable again.
    #[error("transaction log error: {0}")]
    Log(#[from] LogError),

    /// A resource manager call failed before the outcome was decided.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// An operation was invoked in a state that forbids it.
    ///
    /// Always a caller programming error; never retried.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violation.
        message: String,
    },

    /// `commit` resulted in a rollback because a branch rejected `prepare`.
    ///
    /// Every branch was rolled back; no branch committed.
    #[error("transaction rolled back: resource '{resource}' rejected prepare: {reason}")]
    RolledBack {
        /// The resource manager whose vote failed.
        resource: String,
        /// The vote failure.
        reason: String,
    },

    /// One or more branches failed after the commit decision was durable.
    ///
    /// External side effects may be incomplete until recovery resolves the
    /// in-doubt branches; the transaction record stays COMMITTING.
    #[error("commit in doubt: {} branch(es) failed after the commit decision", .failures.len())]
    InDoubtCommit {
        /// The branches that failed.
        failures: Vec<BranchFailure>,
    },

    /// One or more branches failed during the rollback sweep.
    ///
    /// The remaining branches were still rolled back; the transaction
    /// record stays ROLLING_BACK until recovery resolves the rest.
    #[error("rollback incomplete: {} branch(es) failed during rollback", .failures.len())]
    InDoubtRollback {
        /// The branches that failed.
        failures: Vec<BranchFailure>,
    },

    /// A xid bearing this coordinator's format id has a malformed layout.
    #[error("malformed xid: {message}")]
    MalformedXid {
        /// Description of the defect.
        message: String,
    },

    /// The manager configuration is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl TxError {
    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a malformed-xid error.
    pub fn malformed_xid(message: impl Into<String>) -> Self {
        Self::MalformedXid {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
