//! Completion callbacks observing a transaction's outcome.

use crate::types::TransactionId;

/// Final outcome of a transaction, as seen by completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Every branch committed.
    Committed,
    /// Every branch was rolled back.
    RolledBack,
    /// At least one branch is in doubt pending recovery.
    InDoubt,
}

/// Observer of a single transaction's completion.
///
/// Registered before completion starts; invoked exactly once, after the
/// outcome is settled and logged. Callbacks must not enlist resources or
/// re-enter the coordinator. A panicking callback is caught and logged;
/// it never changes the transaction's outcome.
pub trait Synchronization: Send {
    /// Called after completion with the settled outcome.
    fn after_completion(&self, transaction_id: TransactionId, outcome: TxOutcome);
}

impl<F> Synchronization for F
where
    F: Fn(TransactionId, TxOutcome) + Send,
{
    fn after_completion(&self, transaction_id: TransactionId, outcome: TxOutcome) {
        self(transaction_id, outcome);
    }
}
