//! # Quorate Transaction Log
//!
//! Durable log store for the Quorate transaction coordinator.
//!
//! The coordinator records every transaction and branch status transition
//! here *before* acting on external resource managers. After a crash, the
//! recovery procedure reads this log to decide which in-doubt branches must
//! be committed and which must be rolled back.
//!
//! Two implementations are provided:
//! - [`MemoryLog`] - for tests and ephemeral transaction managers
//! - [`FileLog`] - an append-only journal with write-ahead durability
//!
//! The log enforces the status state machine: updates that would move a
//! transaction or branch backwards are rejected, and a record can only be
//! deleted once it and all of its branches are terminal.

mod error;
mod file;
mod journal;
mod memory;
mod record;
mod state;
mod status;
mod store;

pub use error::{LogError, LogResult};
pub use file::FileLog;
pub use memory::MemoryLog;
pub use record::{ResourceRecord, TransactionRecord};
pub use status::{BranchStatus, TransactionStatus};
pub use store::TransactionLog;
