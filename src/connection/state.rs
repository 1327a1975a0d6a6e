//! Connection state machine.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
///
/// ```text
/// Connecting ──handshake ok──► Open ──close──► Closed
///     │                                          ▲
///     ├──handshake failed / timeout──► Failed    │
///     └──manager teardown────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, handshake not finished (or not started).
    Connecting,
    /// Handshake succeeded; sends are accepted.
    Open,
    /// Handshake failed; terminal.
    Failed,
    /// Closed by the manager or the peer; terminal.
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    #[must_use]
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Failed) | (Connecting, Closed) | (Open, Closed)
        )
    }

    /// Returns `true` for states with no outgoing transitions.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Returns `true` once the handshake outcome is known.
    #[inline]
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
