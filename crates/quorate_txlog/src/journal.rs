//! Journal entry format for the file-backed log.
//!
//! Each entry is a CBOR-encoded [`LogOp`] in a checksummed envelope:
//!
//! ```text
//! | magic (4) | version (2) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Replay policy:
//! - A truncated entry at the end of the file is treated as a clean
//!   end-of-log (crash mid-write before fsync) and discarded.
//! - A CRC mismatch, bad magic, or unsupported version is fatal: the log
//!   must not be trusted and the store refuses to open.

use crate::error::{LogError, LogResult};
use crate::record::TransactionRecord;
use crate::status::{BranchStatus, TransactionStatus};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal entry.
pub(crate) const JOURNAL_MAGIC: [u8; 4] = *b"QLOG";

/// Current journal format version.
pub(crate) const JOURNAL_VERSION: u16 = 1;

/// Envelope bytes before the payload: magic + version + length.
const HEADER_LEN: usize = 4 + 2 + 4;

/// A journaled log mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogOp {
    /// A transaction record was created.
    CreateTransaction {
        /// The transaction id.
        transaction_id: u64,
    },
    /// A transaction's status advanced.
    UpdateTransaction {
        /// The transaction id.
        transaction_id: u64,
        /// The new status.
        status: TransactionStatus,
    },
    /// A terminal transaction record was deleted.
    DeleteTransaction {
        /// The transaction id.
        transaction_id: u64,
    },
    /// A branch record was created.
    CreateResource {
        /// The owning transaction id.
        transaction_id: u64,
        /// The resource manager name.
        resource: String,
        /// The initial branch status.
        status: BranchStatus,
    },
    /// A branch's status advanced.
    UpdateResource {
        /// The owning transaction id.
        transaction_id: u64,
        /// The resource manager name.
        resource: String,
        /// The new branch status.
        status: BranchStatus,
    },
    /// A branch record was removed (failed enlistment unwind).
    DeleteResource {
        /// The owning transaction id.
        transaction_id: u64,
        /// The resource manager name.
        resource: String,
    },
    /// A full-state snapshot written by compaction. Replaces all prior state.
    Snapshot {
        /// Every live record at snapshot time.
        records: Vec<TransactionRecord>,
        /// High-water transaction id at snapshot time.
        last_transaction_id: u64,
    },
}

/// Encodes an operation into a framed journal entry.
pub(crate) fn encode_entry(op: &LogOp) -> LogResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(op, &mut payload)
        .map_err(|e| LogError::Encode(e.to_string()))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
    buf.extend_from_slice(&JOURNAL_MAGIC);
    buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    Ok(buf)
}

/// Decodes the entry starting at `offset`.
///
/// Returns `Ok(None)` when the remaining bytes are empty or a truncated
/// tail entry (tolerated as clean end-of-log). Returns the operation and
/// the offset of the next entry otherwise.
pub(crate) fn read_entry(buf: &[u8], offset: usize) -> LogResult<Option<(LogOp, usize)>> {
    let remaining = &buf[offset..];
    if remaining.is_empty() {
        return Ok(None);
    }
    if remaining.len() < HEADER_LEN {
        return Ok(None);
    }

    if remaining[0..4] != JOURNAL_MAGIC {
        return Err(LogError::corrupted(format!(
            "bad journal magic at offset {offset}"
        )));
    }
    let version = u16::from_le_bytes([remaining[4], remaining[5]]);
    if version != JOURNAL_VERSION {
        return Err(LogError::corrupted(format!(
            "unsupported journal version {version}"
        )));
    }
    let len = u32::from_le_bytes([remaining[6], remaining[7], remaining[8], remaining[9]]) as usize;

    let payload_end = HEADER_LEN + len;
    let entry_end = payload_end + 4;
    if remaining.len() < entry_end {
        return Ok(None);
    }

    let payload = &remaining[HEADER_LEN..payload_end];
    let stored_crc = u32::from_le_bytes([
        remaining[payload_end],
        remaining[payload_end + 1],
        remaining[payload_end + 2],
        remaining[payload_end + 3],
    ]);
    let actual_crc = compute_crc32(payload);
    if stored_crc != actual_crc {
        return Err(LogError::corrupted(format!(
            "journal CRC mismatch at offset {offset}: expected {stored_crc:08x}, got {actual_crc:08x}"
        )));
    }

    let op: LogOp =
        ciborium::de::from_reader(payload).map_err(|e| LogError::Decode(e.to_string()))?;
    Ok(Some((op, offset + entry_end)))
}

/// Computes a CRC-32 checksum (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    crc ^ 0xFFFF_FFFF
}
