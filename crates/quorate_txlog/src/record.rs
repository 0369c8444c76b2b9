//! Transaction log record types.

use crate::status::{BranchStatus, TransactionStatus};
use serde::{Deserialize, Serialize};

/// One resource branch's entry within a transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Name identifying the resource manager.
    pub resource_manager_name: String,
    /// Current branch status.
    pub status: BranchStatus,
}

/// A transaction's durable log record.
///
/// Keyed by `transaction_id`; written exclusively by the coordinator that
/// owns the transaction, read by recovery at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// The transaction id.
    pub transaction_id: u64,
    /// Transaction-level status.
    pub status: TransactionStatus,
    /// Per-resource branch records.
    pub resources: Vec<ResourceRecord>,
}

impl TransactionRecord {
    /// Creates a fresh record in the `Active` status with no branches.
    #[must_use]
    pub fn new(transaction_id: u64) -> Self {
        Self {
            transaction_id,
            status: TransactionStatus::Active,
            resources: Vec::new(),
        }
    }

    /// Looks up the branch record for a resource manager.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources
            .iter()
            .find(|r| r.resource_manager_name == name)
    }

    /// Whether every branch has reached a terminal status.
    #[must_use]
    pub fn all_branches_terminal(&self) -> bool {
        self.resources.iter().all(|r| r.status.is_terminal())
    }
}
