//! Shared test fixtures: a scriptable resource manager and tracing setup.
#![allow(dead_code)]

use parking_lot::Mutex;
use quorate_core::{
    EndFlags, PrepareVote, RecoverScan, ResourceError, ResourceManager, ResourceResult,
    StartFlags, XidData,
};
use std::any::Any;
use std::sync::Arc;

/// Chronological journal of resource manager calls, shared across mocks so
/// cross-resource ordering is observable.
pub type CallJournal = Arc<Mutex<Vec<String>>>;

pub fn call_journal() -> CallJournal {
    Arc::new(Mutex::new(Vec::new()))
}

/// A scriptable in-memory resource manager.
///
/// Records every protocol call into a shared journal and can be told to
/// vote read-only, reject prepare, or fail commit/rollback. Its `recover`
/// scan reports whatever xids were seeded via [`seed_in_doubt`]; a
/// successful commit or rollback removes the xid from that set, so a
/// second scan no longer reports it.
pub struct MockResourceManager {
    name: String,
    journal: CallJournal,
    calls: Mutex<Vec<String>>,
    vote: Mutex<PrepareVote>,
    fail_prepare: Mutex<bool>,
    fail_commit: Mutex<bool>,
    fail_rollback: Mutex<bool>,
    in_doubt: Mutex<Vec<XidData>>,
    timeout_secs: Mutex<u64>,
}

impl MockResourceManager {
    pub fn new(name: &str, journal: &CallJournal) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            calls: Mutex::new(Vec::new()),
            vote: Mutex::new(PrepareVote::Ok),
            fail_prepare: Mutex::new(false),
            fail_commit: Mutex::new(false),
            fail_rollback: Mutex::new(false),
            in_doubt: Mutex::new(Vec::new()),
            timeout_secs: Mutex::new(0),
        })
    }

    pub fn vote_read_only(&self) {
        *self.vote.lock() = PrepareVote::ReadOnly;
    }

    pub fn fail_next_prepare(&self) {
        *self.fail_prepare.lock() = true;
    }

    pub fn fail_commits(&self) {
        *self.fail_commit.lock() = true;
    }

    pub fn heal_commits(&self) {
        *self.fail_commit.lock() = false;
    }

    pub fn fail_rollbacks(&self) {
        *self.fail_rollback.lock() = true;
    }

    pub fn seed_in_doubt(&self, xids: impl IntoIterator<Item = XidData>) {
        self.in_doubt.lock().extend(xids);
    }

    pub fn in_doubt_count(&self) -> usize {
        self.in_doubt.lock().len()
    }

    /// Calls made to this manager alone, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
        self.journal.lock().clear();
    }

    pub fn timeout_secs(&self) -> u64 {
        *self.timeout_secs.lock()
    }

    fn record(&self, call: impl Into<String>) {
        let call = call.into();
        self.calls.lock().push(call.clone());
        self.journal.lock().push(format!("{}.{call}", self.name));
    }

    fn settle(&self, xid: &XidData) {
        self.in_doubt.lock().retain(|pending| pending != xid);
    }
}

impl ResourceManager for MockResourceManager {
    fn start(&self, _xid: &XidData, flags: StartFlags) -> ResourceResult<()> {
        self.record(format!("start({flags:?})"));
        Ok(())
    }

    fn end(&self, _xid: &XidData, flags: EndFlags) -> ResourceResult<()> {
        self.record(format!("end({flags:?})"));
        Ok(())
    }

    fn prepare(&self, _xid: &XidData) -> ResourceResult<PrepareVote> {
        self.record("prepare");
        if std::mem::take(&mut *self.fail_prepare.lock()) {
            return Err(ResourceError::with_code(-3, "constraint violated"));
        }
        Ok(*self.vote.lock())
    }

    fn commit(&self, xid: &XidData, one_phase: bool) -> ResourceResult<()> {
        self.record(format!("commit(one_phase={one_phase})"));
        if *self.fail_commit.lock() {
            return Err(ResourceError::with_code(-7, "connection lost"));
        }
        self.settle(xid);
        Ok(())
    }

    fn rollback(&self, xid: &XidData) -> ResourceResult<()> {
        self.record("rollback");
        if *self.fail_rollback.lock() {
            return Err(ResourceError::with_code(-7, "connection lost"));
        }
        self.settle(xid);
        Ok(())
    }

    fn forget(&self, xid: &XidData) -> ResourceResult<()> {
        self.record("forget");
        self.settle(xid);
        Ok(())
    }

    fn recover(&self, _scan: RecoverScan) -> ResourceResult<Vec<XidData>> {
        self.record("recover");
        Ok(self.in_doubt.lock().clone())
    }

    fn is_same_rm(&self, other: &dyn ResourceManager) -> ResourceResult<bool> {
        Ok(other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| o.name == self.name))
    }

    fn transaction_timeout(&self) -> ResourceResult<u64> {
        Ok(*self.timeout_secs.lock())
    }

    fn set_transaction_timeout(&self, seconds: u64) -> ResourceResult<bool> {
        *self.timeout_secs.lock() = seconds;
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
