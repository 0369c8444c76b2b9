//! In-memory record state shared by the log implementations.
//!
//! Both [`crate::MemoryLog`] and [`crate::FileLog`] keep the current record
//! set in a `LogState`; the file log additionally journals every mutation.
//! All contract validation (duplicate keys, monotonic transitions, delete
//! preconditions) lives here so the two implementations cannot diverge.

use crate::error::{LogError, LogResult};
use crate::journal::LogOp;
use crate::record::{ResourceRecord, TransactionRecord};
use crate::status::{BranchStatus, TransactionStatus};
use std::collections::BTreeMap;

/// The full record set plus the high-water transaction id.
#[derive(Debug, Default)]
pub(crate) struct LogState {
    records: BTreeMap<u64, TransactionRecord>,
    last_transaction_id: u64,
}

impl LogState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn last_transaction_id(&self) -> u64 {
        self.last_transaction_id
    }

    pub(crate) fn create_transaction(&mut self, transaction_id: u64) -> LogResult<()> {
        if self.records.contains_key(&transaction_id) {
            return Err(LogError::DuplicateTransaction { transaction_id });
        }
        self.records
            .insert(transaction_id, TransactionRecord::new(transaction_id));
        self.last_transaction_id = self.last_transaction_id.max(transaction_id);
        Ok(())
    }

    pub(crate) fn update_transaction_status(
        &mut self,
        transaction_id: u64,
        status: TransactionStatus,
    ) -> LogResult<()> {
        let record = self
            .records
            .get_mut(&transaction_id)
            .ok_or(LogError::TransactionNotFound { transaction_id })?;
        if !record.status.can_transition_to(status) {
            return Err(LogError::InvalidTransition {
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }
        record.status = status;
        Ok(())
    }

    pub(crate) fn delete_transaction(&mut self, transaction_id: u64) -> LogResult<()> {
        let record = self
            .records
            .get(&transaction_id)
            .ok_or(LogError::TransactionNotFound { transaction_id })?;
        if !record.status.is_terminal() || !record.all_branches_terminal() {
            return Err(LogError::BranchesOutstanding { transaction_id });
        }
        self.records.remove(&transaction_id);
        Ok(())
    }

    pub(crate) fn create_resource_status(
        &mut self,
        transaction_id: u64,
        resource_manager_name: &str,
        status: BranchStatus,
    ) -> LogResult<()> {
        let record = self
            .records
            .get_mut(&transaction_id)
            .ok_or(LogError::TransactionNotFound { transaction_id })?;
        if record.resource(resource_manager_name).is_some() {
            return Err(LogError::DuplicateResource {
                transaction_id,
                resource: resource_manager_name.to_string(),
            });
        }
        record.resources.push(ResourceRecord {
            resource_manager_name: resource_manager_name.to_string(),
            status,
        });
        Ok(())
    }

    pub(crate) fn update_resource_status(
        &mut self,
        transaction_id: u64,
        resource_manager_name: &str,
        status: BranchStatus,
    ) -> LogResult<()> {
        let record = self
            .records
            .get_mut(&transaction_id)
            .ok_or(LogError::TransactionNotFound { transaction_id })?;
        let resource = record
            .resources
            .iter_mut()
            .find(|r| r.resource_manager_name == resource_manager_name)
            .ok_or_else(|| LogError::ResourceNotFound {
                transaction_id,
                resource: resource_manager_name.to_string(),
            })?;
        if !resource.status.can_transition_to(status) {
            return Err(LogError::InvalidTransition {
                from: resource.status.to_string(),
                to: status.to_string(),
            });
        }
        resource.status = status;
        Ok(())
    }

    pub(crate) fn delete_resource_status(
        &mut self,
        transaction_id: u64,
        resource_manager_name: &str,
    ) -> LogResult<()> {
        let record = self
            .records
            .get_mut(&transaction_id)
            .ok_or(LogError::TransactionNotFound { transaction_id })?;
        let before = record.resources.len();
        record
            .resources
            .retain(|r| r.resource_manager_name != resource_manager_name);
        if record.resources.len() == before {
            return Err(LogError::ResourceNotFound {
                transaction_id,
                resource: resource_manager_name.to_string(),
            });
        }
        Ok(())
    }

    /// Snapshot of every non-terminal record, ordered by transaction id.
    pub(crate) fn active_records(&self) -> Vec<TransactionRecord> {
        self.records
            .values()
            .filter(|r| !r.status.is_terminal() || !r.all_branches_terminal())
            .cloned()
            .collect()
    }

    /// Snapshot of every record, for journal compaction.
    pub(crate) fn all_records(&self) -> Vec<TransactionRecord> {
        self.records.values().cloned().collect()
    }

    /// Checks whether an operation would be accepted, without mutating.
    ///
    /// The file log validates before journaling so that a failed append
    /// never leaves the in-memory state ahead of the durable journal; an
    /// op that passes this check cannot fail when applied to the same
    /// state.
    pub(crate) fn validate(&self, op: &LogOp) -> LogResult<()> {
        match op {
            LogOp::CreateTransaction { transaction_id } => {
                if self.records.contains_key(transaction_id) {
                    return Err(LogError::DuplicateTransaction {
                        transaction_id: *transaction_id,
                    });
                }
                Ok(())
            }
            LogOp::UpdateTransaction {
                transaction_id,
                status,
            } => {
                let record = self.record(*transaction_id)?;
                if !record.status.can_transition_to(*status) {
                    return Err(LogError::InvalidTransition {
                        from: record.status.to_string(),
                        to: status.to_string(),
                    });
                }
                Ok(())
            }
            LogOp::DeleteTransaction { transaction_id } => {
                let record = self.record(*transaction_id)?;
                if !record.status.is_terminal() || !record.all_branches_terminal() {
                    return Err(LogError::BranchesOutstanding {
                        transaction_id: *transaction_id,
                    });
                }
                Ok(())
            }
            LogOp::CreateResource {
                transaction_id,
                resource,
                ..
            } => {
                let record = self.record(*transaction_id)?;
                if record.resource(resource).is_some() {
                    return Err(LogError::DuplicateResource {
                        transaction_id: *transaction_id,
                        resource: resource.clone(),
                    });
                }
                Ok(())
            }
            LogOp::UpdateResource {
                transaction_id,
                resource,
                status,
            } => {
                let current = self.branch(*transaction_id, resource)?;
                if !current.can_transition_to(*status) {
                    return Err(LogError::InvalidTransition {
                        from: current.to_string(),
                        to: status.to_string(),
                    });
                }
                Ok(())
            }
            LogOp::DeleteResource {
                transaction_id,
                resource,
            } => {
                self.branch(*transaction_id, resource)?;
                Ok(())
            }
            LogOp::Snapshot { .. } => Ok(()),
        }
    }

    fn record(&self, transaction_id: u64) -> LogResult<&TransactionRecord> {
        self.records
            .get(&transaction_id)
            .ok_or(LogError::TransactionNotFound { transaction_id })
    }

    fn branch(&self, transaction_id: u64, resource: &str) -> LogResult<BranchStatus> {
        self.record(transaction_id)?
            .resource(resource)
            .map(|r| r.status)
            .ok_or_else(|| LogError::ResourceNotFound {
                transaction_id,
                resource: resource.to_string(),
            })
    }

    /// Applies a journaled operation during replay.
    pub(crate) fn apply(&mut self, op: &LogOp) -> LogResult<()> {
        match op {
            LogOp::CreateTransaction { transaction_id } => {
                self.create_transaction(*transaction_id)
            }
            LogOp::UpdateTransaction {
                transaction_id,
                status,
            } => self.update_transaction_status(*transaction_id, *status),
            LogOp::DeleteTransaction { transaction_id } => {
                self.delete_transaction(*transaction_id)
            }
            LogOp::CreateResource {
                transaction_id,
                resource,
                status,
            } => self.create_resource_status(*transaction_id, resource, *status),
            LogOp::UpdateResource {
                transaction_id,
                resource,
                status,
            } => self.update_resource_status(*transaction_id, resource, *status),
            LogOp::DeleteResource {
                transaction_id,
                resource,
            } => self.delete_resource_status(*transaction_id, resource),
            LogOp::Snapshot {
                records,
                last_transaction_id,
            } => {
                self.records = records
                    .iter()
                    .cloned()
                    .map(|r| (r.transaction_id, r))
                    .collect();
                self.last_transaction_id = *last_transaction_id;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_duplicate_fails() {
        let mut state = LogState::new();
        state.create_transaction(1).unwrap();
        assert!(matches!(
            state.create_transaction(1),
            Err(LogError::DuplicateTransaction { transaction_id: 1 })
        ));
    }

    #[test]
    fn last_transaction_id_survives_delete() {
        let mut state = LogState::new();
        state.create_transaction(5).unwrap();
        state
            .update_transaction_status(5, TransactionStatus::RollingBack)
            .unwrap();
        state
            .update_transaction_status(5, TransactionStatus::RolledBack)
            .unwrap();
        state.delete_transaction(5).unwrap();
        assert_eq!(state.last_transaction_id(), 5);
    }

    #[test]
    fn update_missing_transaction_fails() {
        let mut state = LogState::new();
        assert!(matches!(
            state.update_transaction_status(9, TransactionStatus::Preparing),
            Err(LogError::TransactionNotFound { transaction_id: 9 })
        ));
    }

    #[test]
    fn backwards_transition_rejected() {
        let mut state = LogState::new();
        state.create_transaction(1).unwrap();
        state
            .update_transaction_status(1, TransactionStatus::Preparing)
            .unwrap();
        state
            .update_transaction_status(1, TransactionStatus::Prepared)
            .unwrap();
        assert!(matches!(
            state.update_transaction_status(1, TransactionStatus::RollingBack),
            Err(LogError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn delete_with_open_branch_fails() {
        let mut state = LogState::new();
        state.create_transaction(1).unwrap();
        state
            .create_resource_status(1, "orders-db", BranchStatus::Active)
            .unwrap();
        state
            .update_transaction_status(1, TransactionStatus::RollingBack)
            .unwrap();
        state
            .update_transaction_status(1, TransactionStatus::RolledBack)
            .unwrap();
        assert!(matches!(
            state.delete_transaction(1),
            Err(LogError::BranchesOutstanding { transaction_id: 1 })
        ));

        state
            .update_resource_status(1, "orders-db", BranchStatus::RolledBack)
            .unwrap();
        state.delete_transaction(1).unwrap();
    }

    #[test]
    fn duplicate_resource_rejected() {
        let mut state = LogState::new();
        state.create_transaction(1).unwrap();
        state
            .create_resource_status(1, "orders-db", BranchStatus::Active)
            .unwrap();
        assert!(matches!(
            state.create_resource_status(1, "orders-db", BranchStatus::Active),
            Err(LogError::DuplicateResource { .. })
        ));
    }

    #[test]
    fn delete_resource_unwinds_enlistment() {
        let mut state = LogState::new();
        state.create_transaction(1).unwrap();
        state
            .create_resource_status(1, "orders-db", BranchStatus::Active)
            .unwrap();
        state.delete_resource_status(1, "orders-db").unwrap();
        assert!(matches!(
            state.delete_resource_status(1, "orders-db"),
            Err(LogError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn active_records_excludes_terminal() {
        let mut state = LogState::new();
        state.create_transaction(1).unwrap();
        state.create_transaction(2).unwrap();
        state
            .update_transaction_status(2, TransactionStatus::RollingBack)
            .unwrap();
        state
            .update_transaction_status(2, TransactionStatus::RolledBack)
            .unwrap();

        let active = state.active_records();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].transaction_id, 1);
    }

    #[test]
    fn validate_checks_without_mutating() {
        let mut state = LogState::new();
        state.create_transaction(1).unwrap();

        assert!(matches!(
            state.validate(&LogOp::UpdateTransaction {
                transaction_id: 1,
                status: TransactionStatus::Committed,
            }),
            Err(LogError::InvalidTransition { .. })
        ));
        state
            .validate(&LogOp::UpdateTransaction {
                transaction_id: 1,
                status: TransactionStatus::Preparing,
            })
            .unwrap();

        // Neither call changed the record.
        assert_eq!(state.active_records()[0].status, TransactionStatus::Active);
    }

    #[test]
    fn snapshot_replaces_state() {
        let mut state = LogState::new();
        state.create_transaction(1).unwrap();

        let mut other = LogState::new();
        other.create_transaction(3).unwrap();
        let op = LogOp::Snapshot {
            records: other.all_records(),
            last_transaction_id: other.last_transaction_id(),
        };

        state.apply(&op).unwrap();
        assert_eq!(state.last_transaction_id(), 3);
        assert_eq!(state.active_records().len(), 1);
        assert_eq!(state.active_records()[0].transaction_id, 3);
    }
}
