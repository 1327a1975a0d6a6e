//! A single logical connection to a server.
//!
//! The manager owns every [`Connection`] through its registry; callers get
//! a [`ConnectionRef`] for reading state and registering callbacks. All
//! state changes go through the crate-private `mark_*` methods driven by
//! the manager's dispatcher.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::manager::Messenger;
use crate::transport::TransportHandle;

use super::callback::{Callbacks, CloseEvent};
use super::state::ConnectionState;

// ============================================================================
// Types
// ============================================================================

/// Shared, read-mostly reference to a connection.
///
/// Stays readable after the manager drops the connection, so the final
/// state can still be inspected; manager operations on a dropped
/// connection fail with [`Error::ConnectionNotFound`].
pub type ConnectionRef = Arc<Connection>;

/// State and failure reason, always updated together.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Status {
    state: ConnectionState,
    error_reason: Option<String>,
}

// ============================================================================
// Connection
// ============================================================================

/// One logical link to a Cthun server.
pub struct Connection {
    /// Manager-assigned identifier.
    id: ConnectionId,
    /// Target `wss://` URL.
    target_url: Url,
    /// `host:port` of the target.
    remote_server: String,
    /// Current status, observable without locking the registry.
    status: watch::Sender<Status>,
    /// Live transport; present only while open.
    transport: Mutex<Option<Box<dyn TransportHandle>>>,
    /// Handshake task, abortable by teardown.
    pending: Mutex<Option<AbortHandle>>,
    /// Set by the first successful `open`.
    open_requested: AtomicBool,
    /// Registered handlers.
    callbacks: Mutex<Callbacks>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, target_url: Url) -> Self {
        let host = target_url.host_str().unwrap_or_default();
        let remote_server = match target_url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Self {
            id,
            target_url,
            remote_server,
            status: watch::Sender::new(Status {
                state: ConnectionState::Connecting,
                error_reason: None,
            }),
            transport: Mutex::new(None),
            pending: Mutex::new(None),
            open_requested: AtomicBool::new(false),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the target URL.
    #[inline]
    #[must_use]
    pub fn target_url(&self) -> &Url {
        &self.target_url
    }

    /// Returns the target as `host:port`.
    #[inline]
    #[must_use]
    pub fn remote_server(&self) -> &str {
        &self.remote_server
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Returns the failure reason; `Some` exactly when the state is
    /// [`ConnectionState::Failed`].
    #[must_use]
    pub fn error_reason(&self) -> Option<String> {
        self.status.borrow().error_reason.clone()
    }

    /// Returns the state and failure reason from a single snapshot.
    #[must_use]
    pub fn snapshot(&self) -> (ConnectionState, Option<String>) {
        let status = self.status.borrow();
        (status.state, status.error_reason.clone())
    }

    /// Returns `true` if sends are currently accepted.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}

// ============================================================================
// Connection - Completion
// ============================================================================

impl Connection {
    /// Waits until the handshake outcome is known.
    ///
    /// Resolves immediately if the connection already left `Connecting`.
    pub async fn settled(&self) -> ConnectionState {
        self.wait_for(ConnectionState::is_settled).await
    }

    /// Waits until the connection reaches `Failed` or `Closed`.
    pub async fn closed(&self) -> ConnectionState {
        self.wait_for(ConnectionState::is_terminal).await
    }

    async fn wait_for(&self, predicate: fn(ConnectionState) -> bool) -> ConnectionState {
        let mut rx = self.status.subscribe();

        // The sender lives in `self`, so the channel cannot close while we wait.
        match rx.wait_for(|status| predicate(status.state)).await {
            Ok(status) => status.state,
            Err(_) => self.state(),
        }
    }
}

// ============================================================================
// Connection - Callbacks
// ============================================================================

impl Connection {
    /// Sets the handler invoked when the handshake succeeds.
    ///
    /// Replaces any previous handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionViolated`] once `open` has been called.
    pub fn set_on_open_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Messenger, &Connection) + Send + Sync + 'static,
    {
        self.update_callbacks(|callbacks| callbacks.on_open = Some(Arc::new(callback)))
    }

    /// Sets the handler invoked when the handshake fails or times out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionViolated`] once `open` has been called.
    pub fn set_on_fail_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Messenger, &Connection) + Send + Sync + 'static,
    {
        self.update_callbacks(|callbacks| callbacks.on_fail = Some(Arc::new(callback)))
    }

    /// Sets the handler invoked for every inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionViolated`] once `open` has been called.
    pub fn set_on_message_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Messenger, &Connection, &str) + Send + Sync + 'static,
    {
        self.update_callbacks(|callbacks| callbacks.on_message = Some(Arc::new(callback)))
    }

    /// Sets the handler invoked when an open connection closes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionViolated`] once `open` has been called.
    pub fn set_on_close_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Connection, &CloseEvent) + Send + Sync + 'static,
    {
        self.update_callbacks(|callbacks| callbacks.on_close = Some(Arc::new(callback)))
    }

    fn update_callbacks(&self, update: impl FnOnce(&mut Callbacks)) -> Result<()> {
        let mut callbacks = self.callbacks.lock();

        // Checked under the callbacks lock so registration cannot race `begin_open`.
        if self.open_requested.load(Ordering::Acquire) {
            return Err(Error::precondition(format!(
                "callbacks for connection {} must be registered before open",
                self.id
            )));
        }

        update(&mut callbacks);
        Ok(())
    }
}

// ============================================================================
// Connection - Manager Operations
// ============================================================================

impl Connection {
    /// Claims the connection for a handshake.
    pub(crate) fn begin_open(&self) -> Result<()> {
        let _callbacks = self.callbacks.lock();

        match self.state() {
            ConnectionState::Connecting => {}
            ConnectionState::Open => return Err(Error::already_open(self.id)),
            state => {
                return Err(Error::precondition(format!(
                    "connection {} is {state} and cannot be reopened",
                    self.id
                )));
            }
        }

        if self.open_requested.swap(true, Ordering::AcqRel) {
            return Err(Error::already_open(self.id));
        }

        Ok(())
    }

    pub(crate) fn set_pending(&self, handle: AbortHandle) {
        *self.pending.lock() = Some(handle);
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.lock().take();
    }

    /// Aborts an in-flight handshake, if any.
    pub(crate) fn abort_pending(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
            trace!(id = %self.id, "Pending handshake aborted");
        }
    }

    /// Hands `payload` to the transport if the connection is open.
    pub(crate) fn send_text(&self, payload: String) -> Result<()> {
        let transport = self.transport.lock();

        let state = self.state();
        if state != ConnectionState::Open {
            return Err(Error::not_open(self.id, state));
        }

        match transport.as_ref() {
            Some(handle) => handle.send_text(payload),
            // Closing: transport already taken by teardown
            None => Err(Error::not_open(self.id, state)),
        }
    }

    /// Removes the transport so it can be closed outside any lock.
    pub(crate) fn take_transport(&self) -> Option<Box<dyn TransportHandle>> {
        self.transport.lock().take()
    }

    /// `Connecting → Open`. Hands the transport back if the transition is
    /// not allowed so the caller can close it.
    pub(crate) fn mark_open(
        &self,
        handle: Box<dyn TransportHandle>,
    ) -> std::result::Result<(), Box<dyn TransportHandle>> {
        let mut transport = self.transport.lock();

        if self.transition(ConnectionState::Open, None).is_none() {
            return Err(handle);
        }

        *transport = Some(handle);
        debug!(id = %self.id, server = %self.remote_server, "Connection open");
        Ok(())
    }

    /// `Connecting → Failed` with a non-empty reason.
    pub(crate) fn mark_failed(&self, reason: impl Into<String>) -> bool {
        let mut reason = reason.into();
        if reason.is_empty() {
            reason = "unknown error".to_string();
        }

        let applied = self
            .transition(ConnectionState::Failed, Some(reason.clone()))
            .is_some();
        if applied {
            self.transport.lock().take();
            debug!(id = %self.id, server = %self.remote_server, %reason, "Connection failed");
        }
        applied
    }

    /// `Connecting | Open → Closed`. Idempotent; returns the state that was
    /// left, or `None` when the connection was already terminal.
    pub(crate) fn mark_closed(&self) -> Option<ConnectionState> {
        let mut transport = self.transport.lock();

        let previous = self.transition(ConnectionState::Closed, None);
        transport.take();

        let previous = previous?;
        debug!(id = %self.id, from = %previous, "Connection closed");
        Some(previous)
    }

    /// Applies `next` atomically with its reason; returns the previous
    /// state if the transition was allowed.
    fn transition(
        &self,
        next: ConnectionState,
        error_reason: Option<String>,
    ) -> Option<ConnectionState> {
        let mut previous = None;

        self.status.send_if_modified(|status| {
            if !status.state.can_transition_to(next) {
                return false;
            }
            previous = Some(status.state);
            status.state = next;
            status.error_reason = error_reason;
            true
        });

        previous
    }
}

// ============================================================================
// Connection - Callback Dispatch
// ============================================================================

impl Connection {
    fn callbacks(&self) -> Callbacks {
        self.callbacks.lock().clone()
    }

    pub(crate) fn fire_open(&self, messenger: &Messenger) {
        if let Some(callback) = self.callbacks().on_open {
            callback(messenger, self);
        }
    }

    pub(crate) fn fire_fail(&self, messenger: &Messenger) {
        if let Some(callback) = self.callbacks().on_fail {
            callback(messenger, self);
        }
    }

    pub(crate) fn fire_message(&self, messenger: &Messenger, text: &str) {
        if let Some(callback) = self.callbacks().on_message {
            callback(messenger, self, text);
        }
    }

    pub(crate) fn fire_close(&self, event: &CloseEvent) {
        if let Some(callback) = self.callbacks().on_close {
            callback(self, event);
        }
    }
}

// ============================================================================
// Connection - Display
// ============================================================================

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, error_reason) = self.snapshot();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("target_url", &self.target_url.as_str())
            .field("state", &state)
            .field("error_reason", &error_reason)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
