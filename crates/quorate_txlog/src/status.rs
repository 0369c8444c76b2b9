//! Transaction and branch status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction-level status recorded in the durable log.
///
/// Statuses advance monotonically along one of two paths:
///
/// ```text
/// Active -> Preparing -> Prepared -> Committing -> Committed
/// Active -> RollingBack -> RolledBack   (also reachable from Preparing)
/// ```
///
/// `Prepared` is the point of no return: once it is durably recorded the
/// transaction must eventually commit, even across a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Transaction is active; resources may be enlisted.
    Active,
    /// Prepare is being driven across all branches.
    Preparing,
    /// Every branch voted to commit; the outcome is decided.
    Prepared,
    /// Commit is being driven across all branches.
    Committing,
    /// All branches committed. Terminal.
    Committed,
    /// Rollback is being driven across all branches.
    RollingBack,
    /// All branches rolled back. Terminal.
    RolledBack,
}

impl TransactionStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Whether the commit decision was durably reached.
    ///
    /// `Committing` counts as decided: on the two-phase path it is only
    /// entered after `Prepared` was durably recorded. Recovery commits an
    /// in-doubt branch only when its transaction's status passes this test.
    #[must_use]
    pub const fn is_commit_decided(self) -> bool {
        matches!(self, Self::Prepared | Self::Committing | Self::Committed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Preparing)
                | (Self::Active, Self::Committing)
                | (Self::Active, Self::RollingBack)
                | (Self::Preparing, Self::Prepared)
                | (Self::Preparing, Self::RollingBack)
                | (Self::Prepared, Self::Committing)
                | (Self::Committing, Self::Committed)
                | (Self::RollingBack, Self::RolledBack)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Preparing => "PREPARING",
            Self::Prepared => "PREPARED",
            Self::Committing => "COMMITTING",
            Self::Committed => "COMMITTED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// Per-branch status recorded in the durable log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchStatus {
    /// Branch has been started at the resource manager.
    Active,
    /// Branch voted to commit.
    Prepared,
    /// Branch committed. Terminal.
    Committed,
    /// Branch rolled back. Terminal.
    RolledBack,
    /// Branch needs no further protocol calls (read-only vote, or resolved
    /// without action during recovery). Terminal.
    Forgotten,
}

impl BranchStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Forgotten)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Active => !matches!(next, Self::Active),
            Self::Prepared => {
                matches!(next, Self::Committed | Self::RolledBack | Self::Forgotten)
            }
            Self::Committed | Self::RolledBack | Self::Forgotten => false,
        }
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Prepared => "PREPARED",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Forgotten => "FORGOTTEN",
        };
        f.write_str(name)
    }
}
