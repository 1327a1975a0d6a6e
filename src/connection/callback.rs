//! Callback types for connection lifecycle events.
//!
//! Callbacks run on the manager's dispatcher task, one at a time, in
//! the order `open | fail`, then any number of `message`, then `close`.
//! They receive a [`Messenger`] so they can reply through the manager.
//! A callback that blocks delays events for every connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::manager::Messenger;

use super::Connection;

// ============================================================================
// Callback Types
// ============================================================================

/// Called once when the handshake succeeds or fails.
pub type EventCallback = Arc<dyn Fn(&Messenger, &Connection) + Send + Sync>;

/// Called for every inbound text frame while the connection is open.
pub type MessageCallback = Arc<dyn Fn(&Messenger, &Connection, &str) + Send + Sync>;

/// Called once when an open connection closes.
pub type CloseCallback = Arc<dyn Fn(&Connection, &CloseEvent) + Send + Sync>;

/// Registered handlers for one connection.
#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub on_open: Option<EventCallback>,
    pub on_fail: Option<EventCallback>,
    pub on_message: Option<MessageCallback>,
    pub on_close: Option<CloseCallback>,
}

// ============================================================================
// CloseEvent
// ============================================================================

/// Which side ended the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    /// The manager closed it.
    Local,
    /// The server closed it or the link dropped.
    Remote,
}

/// Details delivered to the close callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Which side ended the connection.
    pub initiator: CloseInitiator,
    /// Close reason reported by the peer or the transport, if any.
    pub reason: Option<String>,
    /// `false` when the close handshake errored or missed the shutdown
    /// deadline and resources were released anyway.
    pub clean: bool,
}

impl CloseEvent {
    /// Close requested by the manager.
    #[inline]
    #[must_use]
    pub fn local(clean: bool) -> Self {
        Self {
            initiator: CloseInitiator::Local,
            reason: None,
            clean,
        }
    }

    /// Close initiated by the peer or caused by a transport failure.
    #[inline]
    #[must_use]
    pub fn remote(reason: Option<String>) -> Self {
        Self {
            initiator: CloseInitiator::Remote,
            reason,
            clean: true,
        }
    }
}
