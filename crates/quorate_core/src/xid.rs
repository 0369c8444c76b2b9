//! Global and branch transaction identifiers.
//!
//! Resource managers address distributed-transaction branches by an
//! XA-style xid: a format id, a global-transaction-id byte sequence, and an
//! optional branch-qualifier byte sequence. This module owns the typed
//! forms ([`GlobalXid`], [`BranchXid`]), their fixed byte layout, and the
//! recovery filter that picks this manager's branches out of whatever a
//! resource manager reports from `recover`.
//!
//! Byte layout (must round-trip exactly, since resource managers persist
//! and return it):
//!
//! ```text
//! global-transaction-id: | name_len (1) | manager name (name_len) | transaction id (8, BE) |
//! branch-qualifier:      | branch id (4, BE) |        (empty for a global xid)
//! ```

use crate::error::{TxError, TxResult};
use crate::types::{BranchId, TransactionId};
use std::fmt;
use tracing::warn;

/// Reserved xid format id for this coordinator.
///
/// Distinct from any other transaction manager sharing the same resource
/// managers; xids carrying a different format id are never touched.
pub const FORMAT_ID: u32 = 0x5154_5831; // "QTX1"

/// Maximum manager name length, in bytes.
///
/// The global-transaction-id is capped at 64 bytes (the XA gtrid limit);
/// one byte frames the name length and eight carry the transaction id.
pub const MAX_MANAGER_NAME_LEN: usize = 64 - 1 - 8;

/// Length of the branch-qualifier byte sequence.
const BQUAL_LEN: usize = 4;

/// The external xid representation exchanged with resource managers.
///
/// This is the triple a resource manager persists and returns from
/// `recover`; it carries no interpretation of the byte sequences.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XidData {
    /// Format id identifying the owning transaction manager family.
    pub format_id: u32,
    /// Global-transaction-id byte sequence.
    pub global_transaction_id: Vec<u8>,
    /// Branch-qualifier byte sequence; empty for a global xid.
    pub branch_qualifier: Vec<u8>,
}

/// Identifier of a global transaction.
///
/// Created once at `begin` and immutable thereafter. Two global xids are
/// equal iff their manager name and transaction id are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalXid {
    manager_name: String,
    transaction_id: TransactionId,
}

impl GlobalXid {
    /// Creates a global xid.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::MalformedXid`] if the manager name exceeds
    /// [`MAX_MANAGER_NAME_LEN`] bytes; a longer name cannot round-trip
    /// through the one-byte length frame.
    pub fn new(manager_name: impl Into<String>, transaction_id: TransactionId) -> TxResult<Self> {
        let manager_name = manager_name.into();
        if manager_name.len() > MAX_MANAGER_NAME_LEN {
            return Err(TxError::malformed_xid(format!(
                "manager name is {} bytes, limit {MAX_MANAGER_NAME_LEN}",
                manager_name.len()
            )));
        }
        Ok(Self {
            manager_name,
            transaction_id,
        })
    }

    /// Returns the owning manager's name.
    #[must_use]
    pub fn manager_name(&self) -> &str {
        &self.manager_name
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Derives the branch xid for the given branch ordinal.
    #[must_use]
    pub fn create_branch_xid(&self, branch_id: BranchId) -> BranchXid {
        BranchXid {
            global: self.clone(),
            branch_id,
        }
    }

    /// Encodes to the external representation (empty branch qualifier).
    #[must_use]
    pub fn to_xid_data(&self) -> XidData {
        XidData {
            format_id: FORMAT_ID,
            global_transaction_id: encode_gtrid(&self.manager_name, self.transaction_id),
            branch_qualifier: Vec::new(),
        }
    }

    /// Decodes a global xid from its external representation.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::MalformedXid`] if the format id is foreign, the
    /// global-transaction-id bytes are malformed, or a branch qualifier is
    /// present.
    pub fn from_xid_data(data: &XidData) -> TxResult<Self> {
        check_format(data)?;
        if !data.branch_qualifier.is_empty() {
            return Err(TxError::malformed_xid(
                "branch qualifier present on a global xid",
            ));
        }
        let (manager_name, transaction_id) = decode_gtrid(&data.global_transaction_id)?;
        Ok(Self {
            manager_name,
            transaction_id,
        })
    }
}

impl fmt::Display for GlobalXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.manager_name, self.transaction_id.as_u64())
    }
}

/// Identifier of one resource branch within a global transaction.
///
/// Equality requires the manager name, transaction id, and branch id to
/// all match; a branch xid is never equal to its parent global xid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchXid {
    global: GlobalXid,
    branch_id: BranchId,
}

impl BranchXid {
    /// Returns the parent global xid.
    #[must_use]
    pub fn global(&self) -> &GlobalXid {
        &self.global
    }

    /// Returns the owning manager's name.
    #[must_use]
    pub fn manager_name(&self) -> &str {
        self.global.manager_name()
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.global.transaction_id()
    }

    /// Returns the branch ordinal.
    #[must_use]
    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    /// Encodes to the external representation.
    ///
    /// The global-transaction-id bytes are identical to the parent global
    /// xid's; only the branch qualifier differs.
    #[must_use]
    pub fn to_xid_data(&self) -> XidData {
        XidData {
            format_id: FORMAT_ID,
            global_transaction_id: encode_gtrid(
                self.global.manager_name(),
                self.global.transaction_id(),
            ),
            branch_qualifier: self.branch_id.as_u32().to_be_bytes().to_vec(),
        }
    }

    /// Decodes a branch xid from its external representation.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::MalformedXid`] if the format id is foreign, the
    /// global-transaction-id bytes are malformed, or the branch qualifier
    /// is absent or the wrong length.
    pub fn from_xid_data(data: &XidData) -> TxResult<Self> {
        check_format(data)?;
        let (manager_name, transaction_id) = decode_gtrid(&data.global_transaction_id)?;
        let bqual: [u8; BQUAL_LEN] = data
            .branch_qualifier
            .as_slice()
            .try_into()
            .map_err(|_| {
                TxError::malformed_xid(format!(
                    "branch qualifier must be {BQUAL_LEN} bytes, got {}",
                    data.branch_qualifier.len()
                ))
            })?;
        Ok(Self {
            // decode_gtrid enforced the name length.
            global: GlobalXid {
                manager_name,
                transaction_id,
            },
            branch_id: BranchId::new(u32::from_be_bytes(bqual)),
        })
    }
}

impl fmt::Display for BranchXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.global, self.branch_id.as_u32())
    }
}

/// Selects this manager's branch xids from a resource manager's `recover`
/// output, preserving input order.
///
/// A reported xid survives the filter iff its format id is ours, its
/// global-transaction-id decodes to `manager_name`, and its branch
/// qualifier is present. Xids with a foreign format id or manager name, or
/// with no branch qualifier, belong to someone else and are skipped
/// silently. Xids bearing our format id but a malformed layout are logged
/// and skipped; they must never crash recovery.
#[must_use]
pub fn filter_recovery_xids(xids: &[XidData], manager_name: &str) -> Vec<BranchXid> {
    xids.iter()
        .filter_map(|xid| {
            if xid.format_id != FORMAT_ID {
                return None;
            }
            if xid.branch_qualifier.is_empty() {
                // A global xid; branches are what recovery acts on.
                return None;
            }
            match BranchXid::from_xid_data(xid) {
                Ok(branch) if branch.manager_name() == manager_name => Some(branch),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "skipping unrecognized xid during recovery");
                    None
                }
            }
        })
        .collect()
}

fn encode_gtrid(manager_name: &str, transaction_id: TransactionId) -> Vec<u8> {
    let name = manager_name.as_bytes();
    let mut buf = Vec::with_capacity(1 + name.len() + 8);
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.extend_from_slice(&transaction_id.as_u64().to_be_bytes());
    buf
}

fn decode_gtrid(bytes: &[u8]) -> TxResult<(String, TransactionId)> {
    let &name_len = bytes
        .first()
        .ok_or_else(|| TxError::malformed_xid("empty global transaction id"))?;
    if name_len as usize > MAX_MANAGER_NAME_LEN {
        return Err(TxError::malformed_xid(format!(
            "manager name length {name_len} exceeds limit {MAX_MANAGER_NAME_LEN}"
        )));
    }
    let expected = 1 + name_len as usize + 8;
    if bytes.len() != expected {
        return Err(TxError::malformed_xid(format!(
            "global transaction id is {} bytes, expected {expected}",
            bytes.len()
        )));
    }
    let name = std::str::from_utf8(&bytes[1..1 + name_len as usize])
        .map_err(|_| TxError::malformed_xid("manager name is not valid UTF-8"))?;
    let id_bytes: [u8; 8] = bytes[1 + name_len as usize..].try_into().expect("checked");
    Ok((
        name.to_string(),
        TransactionId::new(u64::from_be_bytes(id_bytes)),
    ))
}

fn check_format(data: &XidData) -> TxResult<()> {
    if data.format_id != FORMAT_ID {
        return Err(TxError::malformed_xid(format!(
            "foreign format id {:#010x}",
            data.format_id
        )));
    }
    Ok(())
}
