//! Embeddable XA-style distributed transaction coordinator.
//!
//! Quorate coordinates a single atomic outcome across multiple resource
//! managers (databases, message brokers) with two-phase commit. The
//! [`TransactionManager`] issues transactions and runs crash recovery; each
//! [`TransactionCoordinator`] drives one transaction's branch set through
//! enlistment and completion, journaling every status transition to a
//! [`TransactionLog`](quorate_txlog::TransactionLog) before acting on it.
//!
//! ```no_run
//! use quorate_core::{ManagerConfig, ResourceAdapter, TransactionManager};
//! use quorate_txlog::FileLog;
//! use std::sync::Arc;
//!
//! # fn connect() -> Arc<dyn quorate_core::ResourceManager> { unimplemented!() }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let log = Arc::new(FileLog::open("txlog.journal")?);
//! let orders = ResourceAdapter::new("orders-db", true, connect());
//! let manager = TransactionManager::open(
//!     ManagerConfig::new("tm001"),
//!     log,
//!     std::slice::from_ref(&orders),
//! )?;
//!
//! let tx = manager.begin()?;
//! tx.enlist(orders)?;
//! // ... work against the enlisted resources ...
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod coordinator;
mod error;
mod manager;
mod resource;
mod synchronization;
mod types;
mod xid;

pub use config::{ManagerConfig, DEFAULT_TRANSACTION_TIMEOUT_SECS};
pub use coordinator::TransactionCoordinator;
pub use error::{BranchFailure, TxError, TxResult};
pub use manager::{RecoveryReport, TransactionManager};
pub use resource::{
    EndFlags, PrepareVote, RecoverScan, ResourceAdapter, ResourceError, ResourceManager,
    ResourceResult, StartFlags,
};
pub use synchronization::{Synchronization, TxOutcome};
pub use types::{BranchId, TransactionId};
pub use xid::{filter_recovery_xids, BranchXid, GlobalXid, XidData, FORMAT_ID, MAX_MANAGER_NAME_LEN};

pub use quorate_txlog as txlog;
