//! Process-wide transaction manager and the startup recovery procedure.

use crate::config::ManagerConfig;
use crate::coordinator::TransactionCoordinator;
use crate::error::TxResult;
use crate::resource::{RecoverScan, ResourceAdapter};
use crate::types::TransactionId;
use crate::xid::{filter_recovery_xids, BranchXid, GlobalXid};
use parking_lot::Mutex;
use quorate_txlog::{BranchStatus, TransactionLog, TransactionRecord, TransactionStatus};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Tally of what the startup recovery procedure did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// In-doubt branches committed because the log showed a durable commit
    /// decision.
    pub branches_committed: u64,
    /// In-doubt branches rolled back because the log showed no commit
    /// decision.
    pub branches_rolled_back: u64,
    /// Reported branches with no log record at all, rolled back as the safe
    /// default.
    pub unknown_branches_rolled_back: u64,
    /// Branches whose resolution call failed; their records were left in
    /// place for the next recovery pass.
    pub branches_unresolved: u64,
    /// Fully resolved transaction records deleted from the log.
    pub records_deleted: u64,
}

/// Process-wide transaction manager.
///
/// Issues transaction ids, creates [`TransactionCoordinator`]s, and tracks
/// the live ones. Opening a manager over an existing log runs the recovery
/// procedure to completion before any new transaction can begin, so a
/// restarted process never issues an id that collides with a logged one and
/// never races recovery against new work.
pub struct TransactionManager {
    config: ManagerConfig,
    log: Arc<dyn TransactionLog>,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Weak<TransactionCoordinator>>>,
    recovery_gate: Mutex<()>,
    recovery_report: RecoveryReport,
}

impl TransactionManager {
    /// Opens a transaction manager over a log, recovering first.
    ///
    /// `recovery_resources` are the resource managers to scan for in-doubt
    /// branches; pass every resource manager this manager's transactions
    /// may have touched before the restart. An empty slice skips the scan
    /// but still finalizes leftover log records.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::Config`](crate::TxError::Config) for an invalid
    /// configuration, [`TxError::Log`](crate::TxError::Log) if the log
    /// cannot be read, or a resource manager's error if a recovery scan
    /// fails.
    pub fn open(
        config: ManagerConfig,
        log: Arc<dyn TransactionLog>,
        recovery_resources: &[ResourceAdapter],
    ) -> TxResult<Self> {
        config.validate()?;
        let mut manager = Self {
            next_id: AtomicU64::new(log.last_transaction_id()? + 1),
            config,
            log,
            live: Mutex::new(HashMap::new()),
            recovery_gate: Mutex::new(()),
            recovery_report: RecoveryReport::default(),
        };
        manager.recovery_report = manager.recover(recovery_resources)?;
        Ok(manager)
    }

    /// Returns this manager's name, as embedded in every xid it mints.
    #[must_use]
    pub fn manager_name(&self) -> &str {
        self.config.manager_name()
    }

    /// Returns what the startup recovery pass did.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery_report
    }

    /// Begins a new global transaction.
    ///
    /// The transaction record is durably created before the coordinator is
    /// handed out.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::Log`](crate::TxError::Log) if the record cannot
    /// be created.
    pub fn begin(&self) -> TxResult<Arc<TransactionCoordinator>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        // Config validation bounds the name, so minting the xid cannot
        // fail after a record exists.
        let xid = GlobalXid::new(self.config.manager_name(), TransactionId::new(id))?;
        self.log.create_transaction(id)?;
        info!(xid = %xid, "transaction started");
        let coordinator = Arc::new(TransactionCoordinator::new(
            xid,
            self.log.clone(),
            self.config.timeout_secs(),
        ));

        let mut live = self.live.lock();
        live.retain(|_, weak| weak.strong_count() > 0);
        live.insert(id, Arc::downgrade(&coordinator));
        Ok(coordinator)
    }

    /// Looks up a live coordinator by transaction id.
    #[must_use]
    pub fn find(&self, transaction_id: TransactionId) -> Option<Arc<TransactionCoordinator>> {
        self.live
            .lock()
            .get(&transaction_id.as_u64())
            .and_then(Weak::upgrade)
    }

    /// Number of live transactions that have not reached a terminal status.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.live
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.get_status().is_terminal())
            .count()
    }

    /// Reconciles resource-manager-reported in-doubt branches against the
    /// log.
    ///
    /// A reported branch is committed only when its transaction's logged
    /// status carries a durable commit decision; every other case, unknown
    /// transactions included, rolls back. Resolved branches are forgotten
    /// at the resource manager and their records marked terminal; records
    /// whose branches are all terminal are deleted, so a second pass over
    /// the same state finds nothing to do.
    ///
    /// Runs once during [`open`](Self::open); re-running later is allowed
    /// (passes serialize on an internal lock, and transactions with a live
    /// coordinator are left alone).
    ///
    /// # Errors
    ///
    /// Returns [`TxError::Log`](crate::TxError::Log) if the log cannot be
    /// read, or a resource manager's error if its `recover` scan fails.
    pub fn recover(&self, resources: &[ResourceAdapter]) -> TxResult<RecoveryReport> {
        let _pass = self.recovery_gate.lock();
        let snapshot = self.log.list_active_transactions()?;
        if snapshot.is_empty() && resources.is_empty() {
            return Ok(RecoveryReport::default());
        }
        info!(records = snapshot.len(), "recovery started");

        let by_id: HashMap<u64, &TransactionRecord> = snapshot
            .iter()
            .filter(|record| !self.is_live(record.transaction_id))
            .map(|record| (record.transaction_id, record))
            .collect();
        let mut report = RecoveryReport::default();
        let mut unresolved: HashSet<u64> = HashSet::new();

        for adapter in resources {
            let reported = adapter.recover(RecoverScan::Full)?;
            let branches = filter_recovery_xids(&reported, self.config.manager_name());
            debug!(
                resource = adapter.resource_manager_name(),
                reported = reported.len(),
                ours = branches.len(),
                "recovery scan"
            );
            for xid in branches {
                self.resolve_branch(adapter, &xid, &by_id, &mut unresolved, &mut report);
            }
        }

        // Finalization: mark leftover non-terminal branches, drive each
        // record's status to its terminal form, delete.
        for record in self.log.list_active_transactions()? {
            if unresolved.contains(&record.transaction_id)
                || !by_id.contains_key(&record.transaction_id)
            {
                continue;
            }
            self.finalize_record(&record, &mut report);
        }

        info!(
            committed = report.branches_committed,
            rolled_back = report.branches_rolled_back,
            unknown = report.unknown_branches_rolled_back,
            unresolved = report.branches_unresolved,
            deleted = report.records_deleted,
            "recovery finished"
        );
        Ok(report)
    }

    fn resolve_branch(
        &self,
        adapter: &ResourceAdapter,
        xid: &BranchXid,
        by_id: &HashMap<u64, &TransactionRecord>,
        unresolved: &mut HashSet<u64>,
        report: &mut RecoveryReport,
    ) {
        let transaction_id = xid.transaction_id().as_u64();
        if self.is_live(transaction_id) {
            debug!(xid = %xid, "skipping branch of a live transaction");
            return;
        }
        match by_id.get(&transaction_id) {
            Some(record) if record.status.is_commit_decided() => {
                info!(xid = %xid, status = %record.status, "recovery committing in-doubt branch");
                match adapter.commit(xid, false) {
                    Ok(()) => {
                        self.forget_quietly(adapter, xid);
                        self.mark_branch_quietly(transaction_id, adapter, BranchStatus::Committed);
                        report.branches_committed += 1;
                    }
                    Err(e) => {
                        warn!(xid = %xid, error = %e, "recovery commit failed; leaving record for next pass");
                        unresolved.insert(transaction_id);
                        report.branches_unresolved += 1;
                    }
                }
            }
            Some(record) => {
                info!(xid = %xid, status = %record.status, "recovery rolling back in-doubt branch");
                match adapter.rollback(xid) {
                    Ok(()) => {
                        self.forget_quietly(adapter, xid);
                        self.mark_branch_quietly(transaction_id, adapter, BranchStatus::RolledBack);
                        report.branches_rolled_back += 1;
                    }
                    Err(e) => {
                        warn!(xid = %xid, error = %e, "recovery rollback failed; leaving record for next pass");
                        unresolved.insert(transaction_id);
                        report.branches_unresolved += 1;
                    }
                }
            }
            None => {
                // No record at all; rollback is the safe default.
                info!(xid = %xid, "recovery rolling back branch with no log record");
                match adapter.rollback(xid) {
                    Ok(()) => {
                        self.forget_quietly(adapter, xid);
                        report.unknown_branches_rolled_back += 1;
                    }
                    Err(e) => {
                        warn!(xid = %xid, error = %e, "rollback of unknown branch failed");
                        report.branches_unresolved += 1;
                    }
                }
            }
        }
    }

    /// Drives a fully reconciled record to a terminal status and deletes it.
    fn finalize_record(&self, record: &TransactionRecord, report: &mut RecoveryReport) {
        let id = record.transaction_id;

        // Branches no resource manager reported were already settled on the
        // resource side; only the bookkeeping remains.
        for resource in &record.resources {
            if !resource.status.is_terminal() {
                if let Err(e) = self.log.update_resource_status(
                    id,
                    &resource.resource_manager_name,
                    BranchStatus::Forgotten,
                ) {
                    warn!(transaction_id = id, resource = %resource.resource_manager_name, error = %e, "failed to close leftover branch record");
                    return;
                }
            }
        }

        let chain: &[TransactionStatus] = match record.status {
            TransactionStatus::Active | TransactionStatus::Preparing => {
                &[TransactionStatus::RollingBack, TransactionStatus::RolledBack]
            }
            TransactionStatus::RollingBack => &[TransactionStatus::RolledBack],
            TransactionStatus::Prepared => {
                &[TransactionStatus::Committing, TransactionStatus::Committed]
            }
            TransactionStatus::Committing => &[TransactionStatus::Committed],
            TransactionStatus::Committed | TransactionStatus::RolledBack => &[],
        };
        for &status in chain {
            if let Err(e) = self.log.update_transaction_status(id, status) {
                warn!(transaction_id = id, error = %e, "failed to finalize transaction status");
                return;
            }
        }
        match self.log.delete_transaction(id) {
            Ok(()) => {
                debug!(transaction_id = id, "recovery deleted resolved record");
                report.records_deleted += 1;
            }
            Err(e) => {
                warn!(transaction_id = id, error = %e, "failed to delete resolved record");
            }
        }
    }

    fn is_live(&self, transaction_id: u64) -> bool {
        self.live
            .lock()
            .get(&transaction_id)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    fn forget_quietly(&self, adapter: &ResourceAdapter, xid: &BranchXid) {
        if let Err(e) = adapter.forget(xid) {
            debug!(xid = %xid, error = %e, "forget after recovery resolution failed");
        }
    }

    fn mark_branch_quietly(
        &self,
        transaction_id: u64,
        adapter: &ResourceAdapter,
        status: BranchStatus,
    ) {
        if let Err(e) = self.log.update_resource_status(
            transaction_id,
            adapter.resource_manager_name(),
            status,
        ) {
            warn!(
                transaction_id,
                resource = adapter.resource_manager_name(),
                error = %e,
                "failed to record recovered branch status"
            );
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("manager_name", &self.config.manager_name())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
