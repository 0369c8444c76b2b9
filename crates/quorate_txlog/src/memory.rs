//! In-memory transaction log for testing.

use crate::error::LogResult;
use crate::record::TransactionRecord;
use crate::state::LogState;
use crate::status::{BranchStatus, TransactionStatus};
use crate::store::TransactionLog;
use parking_lot::RwLock;

/// An in-memory transaction log.
///
/// Suitable for unit tests, integration tests, and ephemeral transaction
/// managers that do not need crash recovery. All contract checks behave
/// identically to [`crate::FileLog`].
///
/// # Thread Safety
///
/// Thread-safe; can be shared across threads behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryLog {
    state: RwLock<LogState>,
}

impl MemoryLog {
    /// Creates a new empty in-memory log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionLog for MemoryLog {
    fn create_transaction(&self, transaction_id: u64) -> LogResult<()> {
        self.state.write().create_transaction(transaction_id)
    }

    fn update_transaction_status(
        &self,
        transaction_id: u64,
        status: TransactionStatus,
    ) -> LogResult<()> {
        self.state
            .write()
            .update_transaction_status(transaction_id, status)
    }

    fn delete_transaction(&self, transaction_id: u64) -> LogResult<()> {
        self.state.write().delete_transaction(transaction_id)
    }

    fn create_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
        status: BranchStatus,
    ) -> LogResult<()> {
        self.state
            .write()
            .create_resource_status(transaction_id, resource_manager_name, status)
    }

    fn update_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
        status: BranchStatus,
    ) -> LogResult<()> {
        self.state
            .write()
            .update_resource_status(transaction_id, resource_manager_name, status)
    }

    fn delete_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
    ) -> LogResult<()> {
        self.state
            .write()
            .delete_resource_status(transaction_id, resource_manager_name)
    }

    fn list_active_transactions(&self) -> LogResult<Vec<TransactionRecord>> {
        Ok(self.state.read().active_records())
    }

    fn last_transaction_id(&self) -> LogResult<u64> {
        Ok(self.state.read().last_transaction_id())
    }
}
