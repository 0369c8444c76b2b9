//! Resource manager branch protocol and the coordinator-facing adapter.

use crate::xid::{BranchXid, XidData};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Result type for resource manager calls.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// An opaque failure reported by a resource manager.
///
/// Resource managers surface vendor-specific failure codes; the coordinator
/// only maps them into its own error categories and never interprets the
/// code itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceError {
    code: Option<i32>,
    message: String,
}

impl ResourceError {
    /// Creates an error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Creates an error carrying a vendor failure code.
    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Returns the vendor failure code, if any.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "resource manager error (code {code}): {}", self.message),
            None => write!(f, "resource manager error: {}", self.message),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Flags for starting work on a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlags {
    /// Start a new branch.
    NoFlags,
    /// Join an existing branch of the same resource manager.
    Join,
    /// Resume a previously suspended branch.
    Resume,
}

/// Flags for ending work on a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlags {
    /// The branch's work completed normally.
    Success,
    /// The branch's work failed; it will be rolled back.
    Fail,
    /// Suspend the branch for later resumption.
    Suspend,
}

/// Scope of a `recover` scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverScan {
    /// Start and finish a scan in one call.
    Full,
    /// Begin a new scan.
    Start,
    /// Finish the current scan.
    End,
}

/// A branch's vote during the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareVote {
    /// The branch is prepared to commit.
    Ok,
    /// The branch performed no writes; it needs no commit call and can be
    /// forgotten immediately.
    ReadOnly,
}

/// The branch-transaction protocol a resource manager must expose.
///
/// This is the collaborator contract at the system boundary: concrete
/// implementations (database drivers, message brokers) are out of scope
/// for the coordinator, which only ever addresses them through
/// [`ResourceAdapter`]. Every call may block on external I/O.
pub trait ResourceManager: Send + Sync {
    /// Starts (or joins/resumes) work on a branch.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the branch cannot be
    /// started.
    fn start(&self, xid: &XidData, flags: StartFlags) -> ResourceResult<()>;

    /// Ends the association between the current work and the branch.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the branch cannot be
    /// ended.
    fn end(&self, xid: &XidData, flags: EndFlags) -> ResourceResult<()>;

    /// Asks the branch to vote on commit.
    ///
    /// # Errors
    ///
    /// A vote against commit is reported as an error; the resource manager
    /// has rolled the branch back.
    fn prepare(&self, xid: &XidData) -> ResourceResult<PrepareVote>;

    /// Commits the branch, optionally in one phase.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the commit fails; the
    /// branch is then in doubt until recovery.
    fn commit(&self, xid: &XidData, one_phase: bool) -> ResourceResult<()>;

    /// Rolls the branch back.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the rollback fails.
    fn rollback(&self, xid: &XidData) -> ResourceResult<()>;

    /// Tells the resource manager to forget a heuristically completed branch.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the branch cannot be
    /// forgotten.
    fn forget(&self, xid: &XidData) -> ResourceResult<()>;

    /// Reports the xids of in-doubt branches.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the scan fails.
    fn recover(&self, scan: RecoverScan) -> ResourceResult<Vec<XidData>>;

    /// Whether `other` fronts the same physical resource manager.
    ///
    /// Implementations typically downcast `other` through
    /// [`as_any`](Self::as_any) and compare connection identity.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the comparison cannot
    /// be made.
    fn is_same_rm(&self, other: &dyn ResourceManager) -> ResourceResult<bool>;

    /// Returns the current branch timeout, in seconds.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the timeout cannot be
    /// read.
    fn transaction_timeout(&self) -> ResourceResult<u64>;

    /// Sets the branch timeout; returns whether the value was accepted.
    ///
    /// A branch exceeding its timeout fails the active call; it is never
    /// silently retried.
    ///
    /// # Errors
    ///
    /// Returns a resource-manager-specific error if the timeout cannot be
    /// set.
    fn set_transaction_timeout(&self, seconds: u64) -> ResourceResult<bool>;

    /// Upcast for concrete-type comparisons in [`is_same_rm`](Self::is_same_rm).
    fn as_any(&self) -> &dyn Any;
}

/// Coordinator-facing wrapper around one resource manager enlistment.
///
/// Carries the identity the coordinator needs (`resource_manager_name`,
/// `supports_join`) without reaching into the wrapped handle, and traces
/// every protocol call with the branch id and flags. Not persisted;
/// reconstructed per enlistment.
#[derive(Clone)]
pub struct ResourceAdapter {
    name: String,
    supports_join: bool,
    inner: Arc<dyn ResourceManager>,
}

impl ResourceAdapter {
    /// Wraps a resource manager handle.
    ///
    /// `name` identifies the resource manager in the transaction log and
    /// for same-manager detection; `supports_join` allows multiple
    /// enlistments against the same manager to share one branch.
    pub fn new(
        name: impl Into<String>,
        supports_join: bool,
        inner: Arc<dyn ResourceManager>,
    ) -> Self {
        Self {
            name: name.into(),
            supports_join,
            inner,
        }
    }

    /// Returns the resource manager's name.
    #[must_use]
    pub fn resource_manager_name(&self) -> &str {
        &self.name
    }

    /// Whether enlistments against this manager may join an existing branch.
    #[must_use]
    pub fn supports_join(&self) -> bool {
        self.supports_join
    }

    /// Whether `other` wraps the same physical resource manager.
    ///
    /// Delegates to the wrapped handles' comparison, never adapter
    /// identity: two distinct adapters around the same manager must
    /// compare equal for join detection to work.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error if the comparison fails.
    pub fn is_same_resource_manager(&self, other: &ResourceAdapter) -> ResourceResult<bool> {
        self.inner.is_same_rm(other.inner.as_ref())
    }

    /// Starts work on a branch.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error.
    pub fn start(&self, xid: &BranchXid, flags: StartFlags) -> ResourceResult<()> {
        trace!(resource = %self.name, branch = %xid, ?flags, "xa start");
        self.inner.start(&xid.to_xid_data(), flags)
    }

    /// Ends work on a branch.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error.
    pub fn end(&self, xid: &BranchXid, flags: EndFlags) -> ResourceResult<()> {
        trace!(resource = %self.name, branch = %xid, ?flags, "xa end");
        self.inner.end(&xid.to_xid_data(), flags)
    }

    /// Collects the branch's commit vote.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error; the branch voted to roll back.
    pub fn prepare(&self, xid: &BranchXid) -> ResourceResult<PrepareVote> {
        trace!(resource = %self.name, branch = %xid, "xa prepare");
        self.inner.prepare(&xid.to_xid_data())
    }

    /// Commits the branch.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error.
    pub fn commit(&self, xid: &BranchXid, one_phase: bool) -> ResourceResult<()> {
        trace!(resource = %self.name, branch = %xid, one_phase, "xa commit");
        self.inner.commit(&xid.to_xid_data(), one_phase)
    }

    /// Rolls the branch back.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error.
    pub fn rollback(&self, xid: &BranchXid) -> ResourceResult<()> {
        trace!(resource = %self.name, branch = %xid, "xa rollback");
        self.inner.rollback(&xid.to_xid_data())
    }

    /// Forgets a completed branch.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error.
    pub fn forget(&self, xid: &BranchXid) -> ResourceResult<()> {
        trace!(resource = %self.name, branch = %xid, "xa forget");
        self.inner.forget(&xid.to_xid_data())
    }

    /// Reports in-doubt xids from the wrapped resource manager.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error.
    pub fn recover(&self, scan: RecoverScan) -> ResourceResult<Vec<XidData>> {
        trace!(resource = %self.name, ?scan, "xa recover");
        self.inner.recover(scan)
    }

    /// Returns the branch timeout, in seconds.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error.
    pub fn transaction_timeout(&self) -> ResourceResult<u64> {
        self.inner.transaction_timeout()
    }

    /// Sets the branch timeout; returns whether it was accepted.
    ///
    /// # Errors
    ///
    /// Returns the wrapped handle's error.
    pub fn set_transaction_timeout(&self, seconds: u64) -> ResourceResult<bool> {
        trace!(resource = %self.name, seconds, "set transaction timeout");
        self.inner.set_transaction_timeout(seconds)
    }
}

impl fmt::Debug for ResourceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceAdapter")
            .field("name", &self.name)
            .field("supports_join", &self.supports_join)
            .finish_non_exhaustive()
    }
}
