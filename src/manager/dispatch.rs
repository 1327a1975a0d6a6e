//! Event dispatch.
//!
//! Every transport event and every teardown passes through one dispatcher
//! task per manager. Processing events one at a time gives each connection
//! the callback order `open | fail`, `message*`, `close`, and the registry
//! lookup on every event drops traffic for connections that were already
//! removed.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::connection::{CloseEvent, ConnectionRef, ConnectionState};
use crate::identifiers::ConnectionId;
use crate::transport::TransportHandle;

use super::core::ManagerInner;
use super::messenger::Messenger;

// ============================================================================
// DispatchEvent
// ============================================================================

/// Events routed to the dispatcher.
pub(crate) enum DispatchEvent {
    /// Handshake task produced a live transport.
    HandshakeSucceeded {
        id: ConnectionId,
        handle: Box<dyn TransportHandle>,
    },
    /// Handshake task failed or timed out.
    HandshakeFailed { id: ConnectionId, reason: String },
    /// Inbound text frame.
    Message { id: ConnectionId, text: String },
    /// Peer closed the connection or the link dropped.
    RemoteClosed {
        id: ConnectionId,
        reason: Option<String>,
    },
    /// Manager removed the connection and finished closing its transport.
    Teardown {
        connection: ConnectionRef,
        event: CloseEvent,
        ack: oneshot::Sender<()>,
    },
}

impl DispatchEvent {
    fn connection_id(&self) -> ConnectionId {
        match self {
            Self::HandshakeSucceeded { id, .. }
            | Self::HandshakeFailed { id, .. }
            | Self::Message { id, .. }
            | Self::RemoteClosed { id, .. } => *id,
            Self::Teardown { connection, .. } => connection.id(),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Single consumer of [`DispatchEvent`]s for one manager.
pub(crate) struct Dispatcher {
    /// Manager state; the dispatcher must not keep it alive.
    inner: Weak<ManagerInner>,
    /// Event queue.
    events_rx: mpsc::UnboundedReceiver<DispatchEvent>,
    /// Inbound events that overtook their handshake result.
    deferred: FxHashMap<ConnectionId, Vec<DispatchEvent>>,
}

impl Dispatcher {
    pub(crate) fn new(
        inner: Weak<ManagerInner>,
        events_rx: mpsc::UnboundedReceiver<DispatchEvent>,
    ) -> Self {
        Self {
            inner,
            events_rx,
            deferred: FxHashMap::default(),
        }
    }

    /// Runs until the manager is dropped and every sender is gone.
    pub(crate) async fn run(mut self) {
        debug!("Dispatcher started");

        while let Some(event) = self.events_rx.recv().await {
            let Some(inner) = self.inner.upgrade() else {
                // Manager dropped; settle teardown waiters and drain.
                if let DispatchEvent::Teardown { ack, .. } = event {
                    let _ = ack.send(());
                }
                continue;
            };

            self.handle(&inner, event);
        }

        debug!("Dispatcher terminated");
    }

    fn handle(&mut self, inner: &Arc<ManagerInner>, event: DispatchEvent) {
        let messenger = Messenger::new(Arc::downgrade(inner));

        match event {
            DispatchEvent::HandshakeSucceeded { id, handle } => match inner.attach(id, handle) {
                Ok(connection) => {
                    info!(%id, server = %connection.remote_server(), "Connection opened");
                    connection.fire_open(&messenger);

                    for early in self.deferred.remove(&id).unwrap_or_default() {
                        self.handle(inner, early);
                    }
                }
                Err(handle) => {
                    debug!(%id, "Handshake finished for removed or settled connection");
                    self.deferred.remove(&id);
                    inner.close_detached(handle);
                }
            },

            DispatchEvent::HandshakeFailed { id, reason } => {
                self.deferred.remove(&id);

                let Some(connection) = inner.lookup(id) else {
                    return;
                };

                connection.clear_pending();

                if connection.mark_failed(reason) {
                    info!(
                        %id,
                        server = %connection.remote_server(),
                        reason = connection.error_reason().unwrap_or_default(),
                        "Connection failed"
                    );
                    connection.fire_fail(&messenger);
                }
            }

            DispatchEvent::Message { id, text } => {
                let Some(connection) = inner.lookup(id) else {
                    trace!(%id, "Message for removed connection dropped");
                    return;
                };

                match connection.state() {
                    ConnectionState::Open => connection.fire_message(&messenger, &text),
                    ConnectionState::Connecting => {
                        self.defer(DispatchEvent::Message { id, text });
                    }
                    state => trace!(%id, %state, "Message after close dropped"),
                }
            }

            DispatchEvent::RemoteClosed { id, reason } => {
                let Some(connection) = inner.lookup(id) else {
                    return;
                };

                match connection.state() {
                    ConnectionState::Open => {
                        if connection.mark_closed().is_some() {
                            info!(%id, ?reason, "Connection closed by remote");
                            connection.fire_close(&CloseEvent::remote(reason));
                        }
                    }
                    ConnectionState::Connecting => {
                        self.defer(DispatchEvent::RemoteClosed { id, reason });
                    }
                    _ => {}
                }
            }

            DispatchEvent::Teardown {
                connection,
                event,
                ack,
            } => {
                self.deferred.remove(&connection.id());

                // Only a connection that reported `open` gets a close callback.
                if connection.mark_closed() == Some(ConnectionState::Open) {
                    connection.fire_close(&event);
                }

                let _ = ack.send(());
            }
        }
    }

    fn defer(&mut self, event: DispatchEvent) {
        let id = event.connection_id();
        trace!(%id, "Event deferred until handshake result");
        self.deferred.entry(id).or_default().push(event);
    }
}
