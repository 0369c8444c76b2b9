//! Per-transaction two-phase commit coordination.

use crate::error::{BranchFailure, TxError, TxResult};
use crate::resource::{EndFlags, PrepareVote, ResourceAdapter, StartFlags};
use crate::synchronization::{Synchronization, TxOutcome};
use crate::types::{BranchId, TransactionId};
use crate::xid::{BranchXid, GlobalXid};
use parking_lot::{Mutex, RwLock};
use quorate_txlog::{BranchStatus, TransactionLog, TransactionStatus};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct Branch {
    xid: BranchXid,
    adapter: ResourceAdapter,
    status: BranchStatus,
    ended: bool,
    suspended: bool,
}

struct Inner {
    branches: Vec<Branch>,
    synchronizations: Vec<Box<dyn Synchronization>>,
    next_branch_id: u32,
}

/// Coordinator for one global transaction.
///
/// Owns the transaction's branch set and drives completion: resources are
/// enlisted while the transaction is `Active`, then [`commit`](Self::commit)
/// or [`rollback`](Self::rollback) settles every branch. Each status
/// transition is durably logged before the protocol step that depends on it
/// is taken against any resource manager.
///
/// All methods are safe to call from any thread; completion and enlistment
/// serialize on an internal lock. A coordinator is single-use: once the
/// transaction reaches a terminal status, further operations fail with
/// [`TxError::InvalidState`].
pub struct TransactionCoordinator {
    global_xid: GlobalXid,
    log: Arc<dyn TransactionLog>,
    status: RwLock<TransactionStatus>,
    inner: Mutex<Inner>,
    timeout_secs: u64,
}

impl TransactionCoordinator {
    pub(crate) fn new(
        global_xid: GlobalXid,
        log: Arc<dyn TransactionLog>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            global_xid,
            log,
            status: RwLock::new(TransactionStatus::Active),
            inner: Mutex::new(Inner {
                branches: Vec::new(),
                synchronizations: Vec::new(),
                next_branch_id: 1,
            }),
            timeout_secs,
        }
    }

    /// Returns the transaction's global xid.
    #[must_use]
    pub fn global_xid(&self) -> &GlobalXid {
        &self.global_xid
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.global_xid.transaction_id()
    }

    /// Returns the transaction's current status.
    ///
    /// Readable at any time, including while another thread is mid-commit.
    #[must_use]
    pub fn get_status(&self) -> TransactionStatus {
        *self.status.read()
    }

    /// Enlists a resource manager, returning the xid of its branch.
    ///
    /// If an already-enlisted branch fronts the same physical resource
    /// manager, the new work re-associates with that branch instead of
    /// creating a second one: a suspended branch is resumed, any other is
    /// joined (both enlistments must allow joining). Otherwise a fresh
    /// branch is recorded in the log before `start` is called; a failed
    /// `start` unwinds the record.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::InvalidState`] unless the transaction is `Active`,
    /// or if the resource manager is already enlisted but joining is not
    /// supported, or the resource manager's error if timeout propagation or
    /// `start` fails.
    pub fn enlist(&self, adapter: ResourceAdapter) -> TxResult<BranchXid> {
        let mut inner = self.inner.lock();
        self.require_active()?;

        for branch in &mut inner.branches {
            if !branch.adapter.is_same_resource_manager(&adapter)? {
                continue;
            }
            if branch.suspended {
                branch.adapter.start(&branch.xid, StartFlags::Resume)?;
                branch.suspended = false;
                branch.ended = false;
                debug!(xid = %branch.xid, resource = branch.adapter.resource_manager_name(), "resumed suspended branch");
                return Ok(branch.xid.clone());
            }
            if branch.adapter.supports_join() && adapter.supports_join() {
                branch.adapter.start(&branch.xid, StartFlags::Join)?;
                branch.ended = false;
                debug!(xid = %branch.xid, resource = branch.adapter.resource_manager_name(), "joined existing branch");
                return Ok(branch.xid.clone());
            }
            return Err(TxError::invalid_state(format!(
                "resource '{}' is already enlisted in {} and joining is not supported",
                adapter.resource_manager_name(),
                self.global_xid
            )));
        }

        if self.timeout_secs > 0 {
            let accepted = adapter.set_transaction_timeout(self.timeout_secs)?;
            if !accepted {
                warn!(
                    resource = adapter.resource_manager_name(),
                    seconds = self.timeout_secs,
                    "resource manager declined transaction timeout"
                );
            }
        }

        let branch_id = BranchId::new(inner.next_branch_id);
        let xid = self.global_xid.create_branch_xid(branch_id);
        let name = adapter.resource_manager_name().to_string();

        self.log.create_resource_status(
            self.transaction_id().as_u64(),
            &name,
            BranchStatus::Active,
        )?;
        if let Err(e) = adapter.start(&xid, StartFlags::NoFlags) {
            if let Err(del) = self
                .log
                .delete_resource_status(self.transaction_id().as_u64(), &name)
            {
                warn!(error = %del, resource = %name, "failed to unwind branch record after start failure");
            }
            return Err(e.into());
        }

        inner.next_branch_id += 1;
        debug!(xid = %xid, resource = %name, "enlisted resource");
        inner.branches.push(Branch {
            xid: xid.clone(),
            adapter,
            status: BranchStatus::Active,
            ended: false,
            suspended: false,
        });
        Ok(xid)
    }

    /// Ends a resource manager's association with its branch.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::InvalidState`] if the transaction is not `Active`
    /// or the resource manager has no live branch, or the resource
    /// manager's error if `end` fails.
    pub fn delist(&self, adapter: &ResourceAdapter, flags: EndFlags) -> TxResult<()> {
        let mut inner = self.inner.lock();
        self.require_active()?;

        for branch in &mut inner.branches {
            if branch.ended {
                continue;
            }
            if branch.adapter.is_same_resource_manager(adapter)? {
                branch.adapter.end(&branch.xid, flags)?;
                if matches!(flags, EndFlags::Suspend) {
                    branch.suspended = true;
                } else {
                    branch.ended = true;
                    branch.suspended = false;
                }
                return Ok(());
            }
        }
        Err(TxError::invalid_state(format!(
            "resource '{}' is not enlisted in {}",
            adapter.resource_manager_name(),
            self.global_xid
        )))
    }

    /// Registers a completion callback.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::InvalidState`] unless the transaction is `Active`.
    pub fn register_synchronization(&self, sync: Box<dyn Synchronization>) -> TxResult<()> {
        let mut inner = self.inner.lock();
        self.require_active()?;
        inner.synchronizations.push(sync);
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// With at most one branch the prepare phase is skipped and the branch
    /// is committed in one phase. With two or more, every branch votes via
    /// `prepare`; the transaction is durably marked `Prepared` only once
    /// every vote is in, and from that point the outcome is commit.
    ///
    /// # Errors
    ///
    /// - [`TxError::RolledBack`] if a branch rejected `prepare`; every
    ///   branch was rolled back.
    /// - [`TxError::InDoubtCommit`] if a branch failed after the commit
    ///   decision was durable; the record is left `COMMITTING` for recovery.
    /// - [`TxError::InDoubtRollback`] if a vote failure's rollback sweep
    ///   itself failed partway.
    /// - [`TxError::InvalidState`] unless the transaction is `Active`.
    /// - [`TxError::Log`] if a transition cannot be durably recorded.
    pub fn commit(&self) -> TxResult<()> {
        let mut inner = self.inner.lock();
        self.require_active()?;

        // Implicit end of any still-associated branch; a failure here is a
        // vote against commit.
        for i in 0..inner.branches.len() {
            if inner.branches[i].ended {
                continue;
            }
            let xid = inner.branches[i].xid.clone();
            let adapter = inner.branches[i].adapter.clone();
            if let Err(e) = adapter.end(&xid, EndFlags::Success) {
                let name = adapter.resource_manager_name().to_string();
                let reason = e.to_string();
                warn!(xid = %xid, resource = %name, error = %e, "end failed; rolling back");
                return self.rollback_after_vote_failure(&mut inner, name, reason);
            }
            inner.branches[i].ended = true;
        }

        if inner.branches.len() <= 1 {
            return self.commit_one_phase(&mut inner);
        }
        self.commit_two_phase(&mut inner)
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// - [`TxError::InDoubtRollback`] if a branch's rollback failed; the
    ///   record is left `ROLLING_BACK` for recovery.
    /// - [`TxError::InvalidState`] unless the transaction is `Active`.
    /// - [`TxError::Log`] if a transition cannot be durably recorded.
    pub fn rollback(&self) -> TxResult<()> {
        let mut inner = self.inner.lock();
        self.require_active()?;

        for branch in &mut inner.branches {
            if !branch.ended {
                if let Err(e) = branch.adapter.end(&branch.xid, EndFlags::Fail) {
                    warn!(xid = %branch.xid, error = %e, "end(fail) before rollback failed");
                }
                branch.ended = true;
            }
        }

        self.set_status(TransactionStatus::RollingBack)?;
        let failures = self.rollback_branches(&mut inner)?;
        if !failures.is_empty() {
            self.notify(&mut inner, TxOutcome::InDoubt);
            return Err(TxError::InDoubtRollback { failures });
        }
        self.set_status(TransactionStatus::RolledBack)?;
        self.delete_record();
        info!(xid = %self.global_xid, "transaction rolled back");
        self.notify(&mut inner, TxOutcome::RolledBack);
        Ok(())
    }

    fn commit_one_phase(&self, inner: &mut Inner) -> TxResult<()> {
        // A single branch needs no vote; the resource manager decides the
        // outcome in one call, and only the result is logged.
        let sole = inner
            .branches
            .first()
            .map(|b| (b.xid.clone(), b.adapter.clone()));
        if let Some((xid, adapter)) = sole {
            let name = adapter.resource_manager_name().to_string();
            if let Err(e) = adapter.commit(&xid, true) {
                // The resource manager rolled the branch back; nothing was
                // prepared.
                let reason = e.to_string();
                warn!(xid = %xid, resource = %name, error = %e, "one-phase commit failed");
                self.set_status(TransactionStatus::RollingBack)?;
                self.mark_branch(inner, &name, BranchStatus::RolledBack)?;
                self.set_status(TransactionStatus::RolledBack)?;
                self.delete_record();
                self.notify(inner, TxOutcome::RolledBack);
                return Err(TxError::RolledBack {
                    resource: name,
                    reason,
                });
            }
            self.set_status(TransactionStatus::Committing)?;
            self.mark_branch(inner, &name, BranchStatus::Committed)?;
        } else {
            self.set_status(TransactionStatus::Committing)?;
        }
        self.set_status(TransactionStatus::Committed)?;
        self.delete_record();
        info!(xid = %self.global_xid, "transaction committed (one phase)");
        self.notify(inner, TxOutcome::Committed);
        Ok(())
    }

    fn commit_two_phase(&self, inner: &mut Inner) -> TxResult<()> {
        self.set_status(TransactionStatus::Preparing)?;

        for i in 0..inner.branches.len() {
            let xid = inner.branches[i].xid.clone();
            let adapter = inner.branches[i].adapter.clone();
            let name = adapter.resource_manager_name().to_string();
            match adapter.prepare(&xid) {
                Ok(PrepareVote::Ok) => {
                    self.mark_branch(inner, &name, BranchStatus::Prepared)?;
                }
                Ok(PrepareVote::ReadOnly) => {
                    // Read-only branches need no second phase.
                    self.mark_branch(inner, &name, BranchStatus::Forgotten)?;
                }
                Err(e) => {
                    // The rejecting branch is swept along with the rest; the
                    // rollback call is how its record reaches a terminal
                    // status.
                    let reason = e.to_string();
                    warn!(xid = %xid, resource = %name, error = %e, "prepare rejected; rolling back");
                    return self.rollback_after_vote_failure(inner, name, reason);
                }
            }
        }

        // Point of no return: once Prepared is durable, the outcome is
        // commit even across a crash.
        self.set_status(TransactionStatus::Prepared)?;
        self.set_status(TransactionStatus::Committing)?;

        let mut failures = Vec::new();
        for i in 0..inner.branches.len() {
            if inner.branches[i].status != BranchStatus::Prepared {
                continue;
            }
            let xid = inner.branches[i].xid.clone();
            let adapter = inner.branches[i].adapter.clone();
            let name = adapter.resource_manager_name().to_string();
            match adapter.commit(&xid, false) {
                Ok(()) => self.mark_branch(inner, &name, BranchStatus::Committed)?,
                Err(e) => {
                    error!(xid = %xid, resource = %name, error = %e, "commit failed after prepare; branch in doubt");
                    failures.push(BranchFailure {
                        resource: name,
                        error: e,
                    });
                }
            }
        }

        if !failures.is_empty() {
            self.notify(inner, TxOutcome::InDoubt);
            return Err(TxError::InDoubtCommit { failures });
        }
        self.set_status(TransactionStatus::Committed)?;
        self.delete_record();
        info!(xid = %self.global_xid, branches = inner.branches.len(), "transaction committed");
        self.notify(inner, TxOutcome::Committed);
        Ok(())
    }

    fn rollback_after_vote_failure(
        &self,
        inner: &mut Inner,
        resource: String,
        reason: String,
    ) -> TxResult<()> {
        self.set_status(TransactionStatus::RollingBack)?;
        let failures = self.rollback_branches(inner)?;
        if !failures.is_empty() {
            self.notify(inner, TxOutcome::InDoubt);
            return Err(TxError::InDoubtRollback { failures });
        }
        self.set_status(TransactionStatus::RolledBack)?;
        self.delete_record();
        info!(xid = %self.global_xid, resource = %resource, "transaction rolled back after vote failure");
        self.notify(inner, TxOutcome::RolledBack);
        Err(TxError::RolledBack { resource, reason })
    }

    /// Rolls back every non-terminal branch, collecting failures rather
    /// than stopping at the first.
    fn rollback_branches(&self, inner: &mut Inner) -> TxResult<Vec<BranchFailure>> {
        let mut failures = Vec::new();
        for i in 0..inner.branches.len() {
            if inner.branches[i].status.is_terminal() {
                continue;
            }
            let xid = inner.branches[i].xid.clone();
            let adapter = inner.branches[i].adapter.clone();
            let name = adapter.resource_manager_name().to_string();
            match adapter.rollback(&xid) {
                Ok(()) => self.mark_branch(inner, &name, BranchStatus::RolledBack)?,
                Err(e) => {
                    error!(xid = %xid, resource = %name, error = %e, "branch rollback failed");
                    failures.push(BranchFailure {
                        resource: name,
                        error: e,
                    });
                }
            }
        }
        Ok(failures)
    }

    fn mark_branch(&self, inner: &mut Inner, name: &str, status: BranchStatus) -> TxResult<()> {
        self.log
            .update_resource_status(self.transaction_id().as_u64(), name, status)?;
        if let Some(branch) = inner
            .branches
            .iter_mut()
            .find(|b| b.adapter.resource_manager_name() == name)
        {
            branch.status = status;
        }
        Ok(())
    }

    fn set_status(&self, status: TransactionStatus) -> TxResult<()> {
        self.log
            .update_transaction_status(self.transaction_id().as_u64(), status)?;
        *self.status.write() = status;
        Ok(())
    }

    /// Removes the fully terminal record. A failure here is not fatal: the
    /// leftover record has only terminal branches and recovery deletes it.
    fn delete_record(&self) {
        if let Err(e) = self.log.delete_transaction(self.transaction_id().as_u64()) {
            warn!(xid = %self.global_xid, error = %e, "failed to delete completed transaction record");
        }
    }

    fn notify(&self, inner: &mut Inner, outcome: TxOutcome) {
        let id = self.transaction_id();
        for sync in inner.synchronizations.drain(..) {
            if catch_unwind(AssertUnwindSafe(|| sync.after_completion(id, outcome))).is_err() {
                error!(xid = %self.global_xid, "synchronization callback panicked");
            }
        }
    }

    fn require_active(&self) -> TxResult<()> {
        let status = *self.status.read();
        if status != TransactionStatus::Active {
            return Err(TxError::invalid_state(format!(
                "{} is {status}, operation requires ACTIVE",
                self.global_xid
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("xid", &self.global_xid)
            .field("status", &self.get_status())
            .finish_non_exhaustive()
    }
}
