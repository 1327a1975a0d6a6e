//! Outcome summary for a group of handshakes.

// ============================================================================
// Imports
// ============================================================================

use crate::connection::{ConnectionRef, ConnectionState};
use crate::identifiers::ConnectionId;

// ============================================================================
// SettleReport
// ============================================================================

/// States of a set of connections after waiting for their handshakes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettleReport {
    /// Connections that are open.
    pub open: Vec<ConnectionId>,
    /// Connections whose handshake failed.
    pub failed: Vec<ConnectionId>,
    /// Connections closed before or after opening.
    pub closed: Vec<ConnectionId>,
    /// Connections still connecting when the wait ended.
    pub pending: Vec<ConnectionId>,
}

impl SettleReport {
    pub(crate) fn collect(connections: &[ConnectionRef]) -> Self {
        let mut report = Self::default();

        for connection in connections {
            let id = connection.id();
            match connection.state() {
                ConnectionState::Open => report.open.push(id),
                ConnectionState::Failed => report.failed.push(id),
                ConnectionState::Closed => report.closed.push(id),
                ConnectionState::Connecting => report.pending.push(id),
            }
        }

        report
    }

    /// Returns `true` if no connection is still connecting.
    #[inline]
    #[must_use]
    pub fn all_settled(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns `true` if every connection opened.
    #[inline]
    #[must_use]
    pub fn all_open(&self) -> bool {
        self.failed.is_empty() && self.closed.is_empty() && self.pending.is_empty()
    }

    /// Total number of connections in the report.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len() + self.failed.len() + self.closed.len() + self.pending.len()
    }

    /// Returns `true` if the report covers no connections.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
