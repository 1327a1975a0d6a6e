//! Reply handle passed to callbacks.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Weak;

use crate::connection::Connection;
use crate::error::{Error, Result};

use super::core::ManagerInner;

// ============================================================================
// Messenger
// ============================================================================

/// Sends through the manager from inside a callback.
///
/// Holds a weak reference, so a messenger kept past the manager's lifetime
/// fails instead of keeping the manager alive.
#[derive(Clone)]
pub struct Messenger {
    inner: Weak<ManagerInner>,
}

impl Messenger {
    pub(crate) fn new(inner: Weak<ManagerInner>) -> Self {
        Self { inner }
    }

    /// Sends `payload` as a text frame on `connection`.
    ///
    /// Same rules as [`ConnectionManager::send`](super::ConnectionManager::send).
    ///
    /// # Errors
    ///
    /// - [`Error::PreconditionViolated`] if the manager was dropped
    /// - [`Error::NotOpen`] / [`Error::ConnectionNotFound`] as for `send`
    pub fn send(&self, connection: &Connection, payload: impl Into<String>) -> Result<()> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| Error::precondition("connection manager has been dropped"))?;

        inner.send(connection, payload.into())
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("manager_alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
