//! Transaction manager configuration.

use crate::error::{TxError, TxResult};
use crate::xid::MAX_MANAGER_NAME_LEN;

/// Default branch timeout applied at enlistment, in seconds.
pub const DEFAULT_TRANSACTION_TIMEOUT_SECS: u64 = 60;

/// Configuration for a [`TransactionManager`](crate::TransactionManager).
///
/// Built once and handed to `TransactionManager::open`; validated there
/// before any xid is minted or any log record written.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    manager_name: String,
    default_timeout_secs: u64,
}

impl ManagerConfig {
    /// Creates a configuration for the named manager with default settings.
    ///
    /// The manager name becomes part of every xid this manager mints; it
    /// must be unique among transaction managers sharing any resource
    /// manager, stable across restarts, and at most
    /// [`MAX_MANAGER_NAME_LEN`] bytes.
    pub fn new(manager_name: impl Into<String>) -> Self {
        Self {
            manager_name: manager_name.into(),
            default_timeout_secs: DEFAULT_TRANSACTION_TIMEOUT_SECS,
        }
    }

    /// Sets the default branch timeout propagated to resource managers at
    /// enlistment. Zero means the resource manager's own default applies.
    #[must_use]
    pub fn default_timeout_secs(mut self, seconds: u64) -> Self {
        self.default_timeout_secs = seconds;
        self
    }

    /// Returns the manager name.
    #[must_use]
    pub fn manager_name(&self) -> &str {
        &self.manager_name
    }

    /// Returns the default branch timeout, in seconds.
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.default_timeout_secs
    }

    pub(crate) fn validate(&self) -> TxResult<()> {
        if self.manager_name.is_empty() {
            return Err(TxError::config("manager name must not be empty"));
        }
        if self.manager_name.len() > MAX_MANAGER_NAME_LEN {
            return Err(TxError::config(format!(
                "manager name is {} bytes, maximum is {MAX_MANAGER_NAME_LEN}",
                self.manager_name.len()
            )));
        }
        Ok(())
    }
}
