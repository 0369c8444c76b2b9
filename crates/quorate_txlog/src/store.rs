//! Transaction log capability trait.

use crate::error::LogResult;
use crate::record::TransactionRecord;
use crate::status::{BranchStatus, TransactionStatus};

/// Durable store for transaction and branch status records.
///
/// The coordinator follows a write-ahead discipline against this trait: a
/// status transition must be durably recorded before any protocol step that
/// depends on it is taken against an external resource manager. An error
/// from any method is therefore fatal to the in-flight transaction - the
/// coordinator never silently proceeds past an unlogged transition.
///
/// # Consistency
///
/// - Status updates are atomic: a concurrent reader never observes a
///   half-written status.
/// - [`list_active_transactions`](Self::list_active_transactions) returns a
///   point-in-time snapshot good enough that recovery never double-resolves
///   a transaction.
/// - Each transaction record has a single writer (its owning coordinator);
///   implementations only need per-record atomicity, not cross-record
///   serialization.
pub trait TransactionLog: Send + Sync {
    /// Creates a transaction record in the `Active` status.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::DuplicateTransaction`](crate::LogError::DuplicateTransaction)
    /// if a record with this id already exists.
    fn create_transaction(&self, transaction_id: u64) -> LogResult<()>;

    /// Advances a transaction's status.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::TransactionNotFound`](crate::LogError::TransactionNotFound)
    /// if the record is absent, or
    /// [`LogError::InvalidTransition`](crate::LogError::InvalidTransition)
    /// if the update would move the record backwards.
    fn update_transaction_status(
        &self,
        transaction_id: u64,
        status: TransactionStatus,
    ) -> LogResult<()>;

    /// Deletes a transaction record and its branch records.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::BranchesOutstanding`](crate::LogError::BranchesOutstanding)
    /// unless the record and every branch are terminal.
    fn delete_transaction(&self, transaction_id: u64) -> LogResult<()>;

    /// Creates a branch record for a resource manager.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::DuplicateResource`](crate::LogError::DuplicateResource)
    /// if this resource manager already has a branch in the transaction.
    fn create_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
        status: BranchStatus,
    ) -> LogResult<()>;

    /// Advances a branch's status.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ResourceNotFound`](crate::LogError::ResourceNotFound)
    /// if the branch is absent, or
    /// [`LogError::InvalidTransition`](crate::LogError::InvalidTransition)
    /// for a backwards update.
    fn update_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
        status: BranchStatus,
    ) -> LogResult<()>;

    /// Removes a branch record.
    ///
    /// Used to unwind an enlistment whose `start` call failed.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ResourceNotFound`](crate::LogError::ResourceNotFound)
    /// if the branch is absent.
    fn delete_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
    ) -> LogResult<()>;

    /// Returns a snapshot of every non-terminal transaction record.
    ///
    /// Used only by the recovery procedure.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list_active_transactions(&self) -> LogResult<Vec<TransactionRecord>>;

    /// Returns the highest transaction id ever created, or 0 if none.
    ///
    /// The value covers deleted records too, so a restarted manager never
    /// reuses an id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn last_transaction_id(&self) -> LogResult<u64>;
}
