//! End-to-end completion protocol tests against scripted resource managers.

mod common;

use common::{call_journal, init_tracing, MockResourceManager};
use parking_lot::Mutex;
use quorate_core::{
    EndFlags, ManagerConfig, ResourceAdapter, TransactionId, TransactionManager, TxError,
    TxOutcome, DEFAULT_TRANSACTION_TIMEOUT_SECS,
};
use quorate_txlog::{BranchStatus, MemoryLog, TransactionLog, TransactionStatus};
use std::sync::Arc;

fn open_manager(log: Arc<dyn TransactionLog>) -> TransactionManager {
    init_tracing();
    TransactionManager::open(ManagerConfig::new("tm001"), log, &[]).unwrap()
}

#[test]
fn two_branch_commit_runs_full_protocol_in_order() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let billing = MockResourceManager::new("billing-db", &journal);
    let log = Arc::new(MemoryLog::new());
    let manager = open_manager(log.clone());

    let tx = manager.begin().unwrap();
    tx.enlist(ResourceAdapter::new("orders-db", true, orders.clone()))
        .unwrap();
    tx.enlist(ResourceAdapter::new("billing-db", true, billing.clone()))
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(
        *journal.lock(),
        vec![
            "orders-db.start(NoFlags)",
            "billing-db.start(NoFlags)",
            "orders-db.end(Success)",
            "billing-db.end(Success)",
            "orders-db.prepare",
            "billing-db.prepare",
            "orders-db.commit(one_phase=false)",
            "billing-db.commit(one_phase=false)",
        ]
    );
    assert_eq!(tx.get_status(), TransactionStatus::Committed);
    assert!(log.list_active_transactions().unwrap().is_empty());
}

#[test]
fn single_branch_commits_in_one_phase() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let tx = manager.begin().unwrap();
    tx.enlist(ResourceAdapter::new("orders-db", true, orders.clone()))
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(
        orders.calls(),
        vec![
            "start(NoFlags)",
            "end(Success)",
            "commit(one_phase=true)",
        ]
    );
    assert_eq!(tx.get_status(), TransactionStatus::Committed);
}

#[test]
fn empty_transaction_commits() {
    let log = Arc::new(MemoryLog::new());
    let manager = open_manager(log.clone());

    let tx = manager.begin().unwrap();
    tx.commit().unwrap();

    assert_eq!(tx.get_status(), TransactionStatus::Committed);
    assert!(log.list_active_transactions().unwrap().is_empty());
}

#[test]
fn prepare_rejection_rolls_everything_back() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let billing = MockResourceManager::new("billing-db", &journal);
    billing.fail_next_prepare();
    let log = Arc::new(MemoryLog::new());
    let manager = open_manager(log.clone());

    let tx = manager.begin().unwrap();
    tx.enlist(ResourceAdapter::new("orders-db", true, orders.clone()))
        .unwrap();
    tx.enlist(ResourceAdapter::new("billing-db", true, billing.clone()))
        .unwrap();

    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err,
        TxError::RolledBack { ref resource, .. } if resource == "billing-db"
    ));

    // Every branch was rolled back; nothing ever committed.
    assert!(orders.calls().contains(&"rollback".to_string()));
    assert!(billing.calls().contains(&"rollback".to_string()));
    assert!(!orders.calls().iter().any(|c| c.starts_with("commit")));
    assert!(!billing.calls().iter().any(|c| c.starts_with("commit")));
    assert_eq!(tx.get_status(), TransactionStatus::RolledBack);
    assert!(log.list_active_transactions().unwrap().is_empty());
}

#[test]
fn read_only_vote_skips_commit_phase() {
    let journal = call_journal();
    let audit = MockResourceManager::new("audit-log", &journal);
    audit.vote_read_only();
    let billing = MockResourceManager::new("billing-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let tx = manager.begin().unwrap();
    tx.enlist(ResourceAdapter::new("audit-log", true, audit.clone()))
        .unwrap();
    tx.enlist(ResourceAdapter::new("billing-db", true, billing.clone()))
        .unwrap();
    tx.commit().unwrap();

    assert!(audit.calls().contains(&"prepare".to_string()));
    assert!(!audit.calls().iter().any(|c| c.starts_with("commit")));
    assert!(billing
        .calls()
        .contains(&"commit(one_phase=false)".to_string()));
    assert_eq!(tx.get_status(), TransactionStatus::Committed);
}

#[test]
fn commit_failure_after_prepare_is_in_doubt() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let billing = MockResourceManager::new("billing-db", &journal);
    billing.fail_commits();
    let log = Arc::new(MemoryLog::new());
    let manager = open_manager(log.clone());

    let tx = manager.begin().unwrap();
    let id = tx.transaction_id();
    tx.enlist(ResourceAdapter::new("orders-db", true, orders.clone()))
        .unwrap();
    tx.enlist(ResourceAdapter::new("billing-db", true, billing.clone()))
        .unwrap();

    let err = tx.commit().unwrap_err();
    match err {
        TxError::InDoubtCommit { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].resource, "billing-db");
        }
        other => panic!("expected InDoubtCommit, got {other}"),
    }

    // The record stays for recovery: decision durable, one branch open.
    assert_eq!(tx.get_status(), TransactionStatus::Committing);
    let records = log.list_active_transactions().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].transaction_id, id.as_u64());
    assert_eq!(records[0].status, TransactionStatus::Committing);
    assert_eq!(
        records[0].resource("orders-db").unwrap().status,
        BranchStatus::Committed
    );
    assert_eq!(
        records[0].resource("billing-db").unwrap().status,
        BranchStatus::Prepared
    );
}

#[test]
fn explicit_rollback_ends_and_rolls_back_branches() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let log = Arc::new(MemoryLog::new());
    let manager = open_manager(log.clone());

    let tx = manager.begin().unwrap();
    tx.enlist(ResourceAdapter::new("orders-db", true, orders.clone()))
        .unwrap();
    tx.rollback().unwrap();

    assert_eq!(
        orders.calls(),
        vec!["start(NoFlags)", "end(Fail)", "rollback"]
    );
    assert_eq!(tx.get_status(), TransactionStatus::RolledBack);
    assert!(log.list_active_transactions().unwrap().is_empty());
}

#[test]
fn second_enlistment_of_same_manager_joins_the_branch() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let tx = manager.begin().unwrap();
    let first = tx
        .enlist(ResourceAdapter::new("orders-db", true, orders.clone()))
        .unwrap();
    let second = tx
        .enlist(ResourceAdapter::new("orders-db", true, orders.clone()))
        .unwrap();
    assert_eq!(first, second);

    tx.commit().unwrap();

    // One branch only, so the one-phase path applies.
    assert_eq!(
        orders.calls(),
        vec![
            "start(NoFlags)",
            "start(Join)",
            "end(Success)",
            "commit(one_phase=true)",
        ]
    );
}

#[test]
fn reenlistment_after_delist_rejoins_the_branch() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let adapter = ResourceAdapter::new("orders-db", true, orders.clone());
    let tx = manager.begin().unwrap();
    let first = tx.enlist(adapter.clone()).unwrap();
    tx.delist(&adapter, EndFlags::Success).unwrap();
    let second = tx.enlist(adapter.clone()).unwrap();
    assert_eq!(first, second);

    tx.commit().unwrap();

    // The rejoined branch is re-ended at commit time.
    assert_eq!(
        orders.calls(),
        vec![
            "start(NoFlags)",
            "end(Success)",
            "start(Join)",
            "end(Success)",
            "commit(one_phase=true)",
        ]
    );
}

#[test]
fn suspended_branch_is_resumed_on_reenlistment() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let adapter = ResourceAdapter::new("orders-db", true, orders.clone());
    let tx = manager.begin().unwrap();
    let first = tx.enlist(adapter.clone()).unwrap();
    tx.delist(&adapter, EndFlags::Suspend).unwrap();
    let second = tx.enlist(adapter.clone()).unwrap();
    assert_eq!(first, second);

    tx.commit().unwrap();

    assert_eq!(
        orders.calls(),
        vec![
            "start(NoFlags)",
            "end(Suspend)",
            "start(Resume)",
            "end(Success)",
            "commit(one_phase=true)",
        ]
    );
}

#[test]
fn non_joinable_reenlistment_is_rejected() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let adapter = ResourceAdapter::new("orders-db", false, orders.clone());
    let tx = manager.begin().unwrap();
    tx.enlist(adapter.clone()).unwrap();
    assert!(matches!(
        tx.enlist(adapter.clone()),
        Err(TxError::InvalidState { .. })
    ));
    tx.rollback().unwrap();
}

#[test]
fn delisted_branch_is_not_ended_twice() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let adapter = ResourceAdapter::new("orders-db", true, orders.clone());
    let tx = manager.begin().unwrap();
    tx.enlist(adapter.clone()).unwrap();
    tx.delist(&adapter, EndFlags::Success).unwrap();
    tx.commit().unwrap();

    assert_eq!(
        orders.calls(),
        vec![
            "start(NoFlags)",
            "end(Success)",
            "commit(one_phase=true)",
        ]
    );
}

#[test]
fn synchronizations_observe_the_outcome() {
    let outcomes: Arc<Mutex<Vec<(TransactionId, TxOutcome)>>> = Arc::new(Mutex::new(Vec::new()));
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let tx = manager.begin().unwrap();
    let id = tx.transaction_id();
    let sink = outcomes.clone();
    tx.register_synchronization(Box::new(move |tx_id, outcome| {
        sink.lock().push((tx_id, outcome));
    }))
    .unwrap();
    tx.commit().unwrap();
    assert_eq!(*outcomes.lock(), vec![(id, TxOutcome::Committed)]);

    let tx = manager.begin().unwrap();
    let id = tx.transaction_id();
    let sink = outcomes.clone();
    tx.register_synchronization(Box::new(move |tx_id, outcome| {
        sink.lock().push((tx_id, outcome));
    }))
    .unwrap();
    tx.rollback().unwrap();
    assert_eq!(outcomes.lock().last(), Some(&(id, TxOutcome::RolledBack)));
}

#[test]
fn panicking_synchronization_does_not_change_the_outcome() {
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let tx = manager.begin().unwrap();
    tx.register_synchronization(Box::new(|_: TransactionId, _: TxOutcome| {
        panic!("listener bug")
    }))
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.get_status(), TransactionStatus::Committed);
}

#[test]
fn completed_transaction_rejects_further_operations() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let tx = manager.begin().unwrap();
    tx.commit().unwrap();

    assert!(matches!(
        tx.enlist(ResourceAdapter::new("orders-db", true, orders)),
        Err(TxError::InvalidState { .. })
    ));
    assert!(matches!(tx.commit(), Err(TxError::InvalidState { .. })));
    assert!(matches!(tx.rollback(), Err(TxError::InvalidState { .. })));
}

#[test]
fn default_timeout_is_propagated_at_enlistment() {
    let journal = call_journal();
    let orders = MockResourceManager::new("orders-db", &journal);
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let tx = manager.begin().unwrap();
    tx.enlist(ResourceAdapter::new("orders-db", true, orders.clone()))
        .unwrap();
    assert_eq!(orders.timeout_secs(), DEFAULT_TRANSACTION_TIMEOUT_SECS);
    tx.rollback().unwrap();
}

#[test]
fn transaction_ids_are_unique_and_findable() {
    let manager = open_manager(Arc::new(MemoryLog::new()));

    let a = manager.begin().unwrap();
    let b = manager.begin().unwrap();
    assert_ne!(a.transaction_id(), b.transaction_id());
    assert_eq!(manager.active_count(), 2);

    let found = manager.find(a.transaction_id()).unwrap();
    assert_eq!(found.transaction_id(), a.transaction_id());

    a.commit().unwrap();
    b.rollback().unwrap();
    assert_eq!(manager.active_count(), 0);
}
