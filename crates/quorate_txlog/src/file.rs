//! File-backed transaction log.

use crate::error::{LogError, LogResult};
use crate::journal::{encode_entry, read_entry, LogOp};
use crate::record::TransactionRecord;
use crate::state::LogState;
use crate::status::{BranchStatus, TransactionStatus};
use crate::store::TransactionLog;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A durable, file-backed transaction log.
///
/// Every mutation is appended to a journal file, flushed, and fsynced
/// before the call returns - the write-ahead discipline the coordinator
/// depends on. On open, the journal is replayed to rebuild the record set;
/// a truncated tail entry (crash mid-write) is discarded, while CRC or
/// format damage refuses to open.
///
/// The journal file is held under an exclusive OS lock for the lifetime of
/// the `FileLog`, so two processes cannot act as the same transaction
/// manager instance.
///
/// # Thread Safety
///
/// Thread-safe; can be shared across threads behind an `Arc`.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Mutex<File>,
    state: RwLock<LogState>,
}

impl FileLog {
    /// Opens or creates a journal at the given path and replays it.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Locked`] if another process holds the journal,
    /// [`LogError::Corrupted`] if replay finds damaged entries, or an I/O
    /// error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        lock_exclusive(&file)?;

        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut buf)?;

        let mut state = LogState::new();
        let mut offset = 0;
        while let Some((op, next)) = read_entry(&buf, offset)? {
            state
                .apply(&op)
                .map_err(|e| LogError::corrupted(format!("journal replay failed: {e}")))?;
            offset = next;
        }
        if offset < buf.len() {
            warn!(
                path = %path.display(),
                discarded = buf.len() - offset,
                "discarding truncated journal tail"
            );
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        debug!(
            path = %path.display(),
            last_transaction_id = state.last_transaction_id(),
            open_records = state.active_records().len(),
            "transaction log opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            state: RwLock::new(state),
        })
    }

    /// Opens a journal, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Same as [`FileLog::open`], plus directory creation failures.
    pub fn open_with_create_dirs(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the journal as a single snapshot entry.
    ///
    /// The journal grows with every status transition; compaction collapses
    /// it to the current record set. The snapshot is written to a sibling
    /// file, fsynced, then renamed over the journal, so a crash at any
    /// point leaves one complete journal behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written or swapped in.
    pub fn compact(&self) -> LogResult<()> {
        let state = self.state.write();
        let entry = encode_entry(&LogOp::Snapshot {
            records: state.all_records(),
            last_transaction_id: state.last_transaction_id(),
        })?;

        let tmp_path = self.path.with_extension("compact");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        // The OS lock follows the file description across the rename, so
        // the new journal is never observable unlocked.
        lock_exclusive(&tmp)?;
        tmp.write_all(&entry)?;
        tmp.sync_all()?;

        let mut file = self.file.lock();
        std::fs::rename(&tmp_path, &self.path)?;
        *file = tmp;

        debug!(path = %self.path.display(), "transaction log compacted");
        Ok(())
    }

    /// Appends a framed entry and makes it durable before returning.
    fn append_op(&self, op: &LogOp) -> LogResult<()> {
        let entry = encode_entry(op)?;
        let mut file = self.file.lock();
        file.write_all(&entry)?;
        file.sync_data()?;
        Ok(())
    }

    /// Validates, durably journals, then applies a mutation.
    ///
    /// The in-memory state must never run ahead of the journal: a reader
    /// (`list_active_transactions` in particular) observing a transition
    /// that was not made durable would let recovery act on a decision a
    /// restart would not see. Validation up front means the post-append
    /// apply cannot fail.
    fn journaled(&self, op: LogOp) -> LogResult<()> {
        let mut state = self.state.write();
        state.validate(&op)?;
        self.append_op(&op)?;
        state.apply(&op)
    }
}

fn lock_exclusive(file: &File) -> LogResult<()> {
    file.try_lock_exclusive().map_err(|e| {
        if e.kind() == ErrorKind::WouldBlock {
            LogError::Locked
        } else {
            LogError::Io(e)
        }
    })
}

impl TransactionLog for FileLog {
    fn create_transaction(&self, transaction_id: u64) -> LogResult<()> {
        self.journaled(LogOp::CreateTransaction { transaction_id })
    }

    fn update_transaction_status(
        &self,
        transaction_id: u64,
        status: TransactionStatus,
    ) -> LogResult<()> {
        self.journaled(LogOp::UpdateTransaction {
            transaction_id,
            status,
        })
    }

    fn delete_transaction(&self, transaction_id: u64) -> LogResult<()> {
        self.journaled(LogOp::DeleteTransaction { transaction_id })
    }

    fn create_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
        status: BranchStatus,
    ) -> LogResult<()> {
        self.journaled(LogOp::CreateResource {
            transaction_id,
            resource: resource_manager_name.to_string(),
            status,
        })
    }

    fn update_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
        status: BranchStatus,
    ) -> LogResult<()> {
        self.journaled(LogOp::UpdateResource {
            transaction_id,
            resource: resource_manager_name.to_string(),
            status,
        })
    }

    fn delete_resource_status(
        &self,
        transaction_id: u64,
        resource_manager_name: &str,
    ) -> LogResult<()> {
        self.journaled(LogOp::DeleteResource {
            transaction_id,
            resource: resource_manager_name.to_string(),
        })
    }

    fn list_active_transactions(&self) -> LogResult<Vec<TransactionRecord>> {
        Ok(self.state.read().active_records())
    }

    fn last_transaction_id(&self) -> LogResult<u64> {
        Ok(self.state.read().last_transaction_id())
    }
}
